use clap::Args;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tickets_trigger::TaskEntry;

#[derive(Args, Debug)]
pub struct ReaderOpts {
    /// Whether to recurse into subdirectories when looking for tasks. Defaults to false
    #[arg(long, default_value_t = false)]
    pub recurse: bool,

    /// The directory containing the tasks to operate on
    pub task_dir: PathBuf,
}

impl ReaderOpts {
    /// Read the directory specified in the options, returning every task found. This is a
    /// convenience method around [read_dir].
    pub fn read_tasks(&self) -> Result<Vec<TaskEntry>> {
        read_dir(&self.task_dir, self.recurse)
    }
}

/// Read a directory from disk, returning a task entry for every file or symlink found, sorted by
/// path. Hidden entries are skipped. If recurse is true, subdirectories are searched as well.
pub fn read_dir(path: impl AsRef<Path>, recurse: bool) -> Result<Vec<TaskEntry>> {
    let mut entries = collect(path.as_ref(), recurse)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn collect(path: &Path, recurse: bool) -> Result<Vec<TaskEntry>> {
    let mut entries = vec![];
    let listing = std::fs::read_dir(path)
        .with_context(|| format!("failed to read task directory {}", path.display()))?;
    for entry in listing {
        let entry = entry?;
        let p = entry.path();
        let Some(task) = TaskEntry::from_path(&p) else {
            log::warn!("skipping {}: name is not valid UTF-8", p.display());
            continue;
        };
        if task.name.starts_with('.') {
            continue;
        }

        // Symlinks are tasks in their own right and are never followed
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if recurse {
                entries.extend(collect(&p, true)?);
            }
        } else if file_type.is_file() || file_type.is_symlink() {
            entries.push(task);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_dir() -> anyhow::Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("2020-08-04 - call mom.txt"), "")?;
        std::fs::write(dir.path().join("ref(1) - follow up.md"), "")?;
        std::fs::write(dir.path().join(".hidden"), "")?;
        std::fs::create_dir(dir.path().join("project"))?;
        std::fs::write(dir.path().join("project/now() - start.txt"), "")?;
        Ok(dir)
    }

    fn names(entries: &[TaskEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    #[test]
    fn read_dir_non_recursive_ignores_subdirectories() -> anyhow::Result<()> {
        let dir = task_dir()?;
        let entries = read_dir(dir.path(), false)?;

        assert_eq!(
            names(&entries),
            ["2020-08-04 - call mom.txt", "ref(1) - follow up.md"]
        );
        assert!(
            entries.iter().all(|entry| entry.path.starts_with(dir.path())),
            "Entries should keep their full path"
        );

        Ok(())
    }

    #[test]
    fn read_dir_recursive_finds_nested_tasks() -> anyhow::Result<()> {
        let dir = task_dir()?;
        let entries = read_dir(dir.path(), true)?;

        assert_eq!(
            names(&entries),
            [
                "2020-08-04 - call mom.txt",
                "now() - start.txt",
                "ref(1) - follow up.md"
            ]
        );
        assert_eq!(
            entries[1].path,
            dir.path().join("project").join("now() - start.txt")
        );

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn read_dir_keeps_symlinks_as_tasks() -> anyhow::Result<()> {
        let dir = task_dir()?;
        std::os::unix::fs::symlink("project", dir.path().join("waiting() - linked"))?;
        let entries = read_dir(dir.path(), false)?;

        assert!(names(&entries).contains(&"waiting() - linked"));
        Ok(())
    }

    #[test]
    fn read_dir_reports_missing_directories() {
        let err = read_dir("/definitely/not/a/task/dir", false).unwrap_err();
        assert!(
            err.to_string().contains("failed to read task directory"),
            "unexpected error message: {err}"
        );
    }
}
