//! A [`TaskFs`] backed by the real filesystem, confined to a jail directory.

use std::path::{Component, Path, PathBuf};

use crate::context::{FileFacts, TaskFs};
use crate::error::FsError;

/// Filesystem access rooted at `root`. Helper programs are looked up in `bin_dir`, which does not
/// need to be inside the jail.
#[derive(Debug, Clone)]
pub struct JailedFs {
    root: PathBuf,
    bin_dir: PathBuf,
}

impl JailedFs {
    /// Create a jail rooted at `root`. The root must exist so it can be canonicalized.
    pub fn new(root: impl AsRef<Path>, bin_dir: impl Into<PathBuf>) -> Result<Self, FsError> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|err| FsError::io(root.display(), err))?;
        Ok(Self {
            root,
            bin_dir: absolute_dir(bin_dir.into()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_inside(&self, path: PathBuf, shown: &str) -> Result<PathBuf, FsError> {
        if path.starts_with(&self.root) {
            Ok(path)
        } else {
            Err(FsError::OutsideJail(shown.to_string()))
        }
    }
}

impl TaskFs for JailedFs {
    fn resolve(&self, base: &Path, relative: &str) -> Result<PathBuf, FsError> {
        let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
        // Absolute paths are taken relative to the jail root
        let joined = match relative.strip_prefix('/') {
            Some(from_root) => self.root.join(from_root),
            None => base.join(relative),
        };

        let normalized = normalize(&joined).ok_or_else(|| FsError::OutsideJail(relative.to_string()))?;
        let normalized = self.ensure_inside(normalized, relative)?;

        // Symlinks may still point outside, so check where the path really ends up
        match normalized.canonicalize() {
            Ok(real) => self.ensure_inside(real, relative),
            Err(_) => Ok(normalized),
        }
    }

    fn stat(&self, path: &Path) -> Result<FileFacts, FsError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileFacts::default());
            }
            Err(err) => return Err(FsError::io(path.display(), err)),
        };

        let size = if metadata.is_dir() {
            std::fs::read_dir(path)
                .map_err(|err| FsError::io(path.display(), err))?
                .count() as u64
        } else {
            metadata.len()
        };

        Ok(FileFacts {
            exists: true,
            is_file: metadata.is_file(),
            is_dir: metadata.is_dir(),
            size,
        })
    }

    fn read_lines(&self, path: &Path) -> Result<Vec<String>, FsError> {
        let content =
            std::fs::read_to_string(path).map_err(|err| FsError::io(path.display(), err))?;
        Ok(content.lines().map(str::to_string).collect())
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        let metadata =
            std::fs::symlink_metadata(path).map_err(|err| FsError::io(path.display(), err))?;
        if !metadata.file_type().is_symlink() {
            return Err(FsError::NotASymlink(path.display().to_string()));
        }
        std::fs::read_link(path).map_err(|err| FsError::io(path.display(), err))
    }

    fn native_path(&self, path: &Path) -> Result<PathBuf, FsError> {
        if path.starts_with(&self.root) || path.is_relative() {
            Ok(path.to_path_buf())
        } else {
            Err(FsError::NoNativePath(path.display().to_string()))
        }
    }

    fn find_binary(&self, name: &str) -> Result<PathBuf, FsError> {
        let mut components = Path::new(name).components();
        let plain_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !plain_name {
            return Err(FsError::BinaryNotFound(name.to_string()));
        }

        let path = self.bin_dir.join(name);
        match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() && is_executable(&metadata) => Ok(path),
            _ => Err(FsError::BinaryNotFound(name.to_string())),
        }
    }
}

/// Helper paths are handed to processes as argv[0], so the binaries root is made absolute even
/// when it does not exist yet.
fn absolute_dir(dir: PathBuf) -> PathBuf {
    dir.canonicalize()
        .or_else(|_| std::path::absolute(&dir).map(|abs| normalize(&abs).unwrap_or(abs)))
        .unwrap_or(dir)
}

/// Lexically resolve `.` and `..`. Returns `None` if `..` climbs above the filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            other => normalized.push(other),
        }
    }
    Some(normalized)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}
