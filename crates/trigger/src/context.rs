//! Capabilities the interpreter consumes from its environment.
//!
//! The interpreter never touches the filesystem or spawns processes directly. Everything goes
//! through these traits so the core can be exercised with fakes.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::builtins::BuiltinRegistry;
use crate::error::{FsError, ProcessError};

/// Facts about a resolved location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileFacts {
    pub exists: bool,
    pub is_file: bool,
    pub is_dir: bool,
    /// Size in bytes for files, number of entries for directories.
    pub size: u64,
}

/// Access to the jailed filesystem the tasks live in.
pub trait TaskFs {
    /// Resolve `relative` against the directory `base` and make sure the result stays inside the
    /// jail.
    fn resolve(&self, base: &Path, relative: &str) -> Result<PathBuf, FsError>;

    /// Query facts about a resolved location. A missing location is not an error.
    fn stat(&self, path: &Path) -> Result<FileFacts, FsError>;

    /// Read a file's content as lines.
    fn read_lines(&self, path: &Path) -> Result<Vec<String>, FsError>;

    /// Read the target of a symbolic link.
    fn read_link(&self, path: &Path) -> Result<PathBuf, FsError>;

    /// The native path backing a task.
    fn native_path(&self, path: &Path) -> Result<PathBuf, FsError>;

    /// Locate a helper program by name inside the configured binaries root.
    fn find_binary(&self, name: &str) -> Result<PathBuf, FsError>;
}

/// What a helper program produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// The exit code, `None` if terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs helper programs. Implementations enforce the wall clock bound and report a timeout as
/// [`ProcessError::Timeout`]; the output protocol itself is checked by the caller.
pub trait ExternalRunner {
    fn run(&self, argv: &[String]) -> Result<ProcessOutput, ProcessError>;
}

/// The tag-filter collaborator.
pub trait FilterOracle {
    /// Whether `path` is the computed output location of a filter.
    fn is_filter_output(&self, path: &Path) -> bool;

    /// Whether the filter writing to `path` currently requires action.
    fn requires_action(&self, path: &Path) -> bool;
}

/// A [`FilterOracle`] for setups without any tag filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilters;

impl FilterOracle for NoFilters {
    fn is_filter_output(&self, _path: &Path) -> bool {
        false
    }

    fn requires_action(&self, _path: &Path) -> bool {
        false
    }
}

/// Everything one evaluation batch needs from the outside world.
pub struct Environment {
    pub now: NaiveDate,
    pub fs: Box<dyn TaskFs>,
    pub runner: Box<dyn ExternalRunner>,
    pub filters: Box<dyn FilterOracle>,
    pub builtins: BuiltinRegistry,
}

impl Environment {
    /// Create an environment with the standard builtins and no tag filters.
    pub fn new(now: NaiveDate, fs: impl TaskFs + 'static, runner: impl ExternalRunner + 'static) -> Self {
        Self {
            now,
            fs: Box::new(fs),
            runner: Box::new(runner),
            filters: Box::new(NoFilters),
            builtins: BuiltinRegistry::standard(),
        }
    }

    /// Replace the tag-filter collaborator.
    pub fn with_filters(mut self, filters: impl FilterOracle + 'static) -> Self {
        self.filters = Box::new(filters);
        self
    }
}
