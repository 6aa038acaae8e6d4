//! Settings shared by the task binaries.
//!
//! Settings come from an optional YAML file and can be overridden on the command line:
//!
//! ```yaml
//! jail_root: /home/me/tasks
//! bin_dir: /home/me/.local/share/tickets/bin
//! timeout_secs: 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

/// How long a helper program may run, in seconds, unless configured otherwise.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// The directory tasks may never escape. Defaults to the task directory itself.
    pub jail_root: Option<PathBuf>,
    /// Where `bin(...)` looks for helper programs. Defaults to `.bin` inside the jail.
    pub bin_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jail_root: None,
            bin_dir: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Loads settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Deserializes settings from a YAML string slice. An empty document yields the defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_norway::from_str(yaml)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The jail root, falling back to `task_dir`.
    pub fn jail_root_for(&self, task_dir: &Path) -> PathBuf {
        self.jail_root
            .clone()
            .unwrap_or_else(|| task_dir.to_path_buf())
    }

    /// The helper directory, falling back to `.bin` inside the jail root.
    pub fn bin_dir_for(&self, jail_root: &Path) -> PathBuf {
        self.bin_dir
            .clone()
            .unwrap_or_else(|| jail_root.join(".bin"))
    }
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// A YAML file with settings. Flags given on the command line take precedence
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// The directory tasks may not escape. Defaults to the task directory
    #[arg(long)]
    pub jail_root: Option<PathBuf>,

    /// The directory helper programs for bin(...) are looked up in
    #[arg(long)]
    pub bin_dir: Option<PathBuf>,

    /// How many seconds a helper program may run before it is killed
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl ConfigArgs {
    /// Load the config file, if any, and apply the command line overrides on top.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(jail_root) = &self.jail_root {
            settings.jail_root = Some(jail_root.clone());
        }
        if let Some(bin_dir) = &self.bin_dir {
            settings.bin_dir = Some(bin_dir.clone());
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        log::debug!("using settings {settings:?}");
        Ok(settings)
    }
}
