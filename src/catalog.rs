//! Enumeration of the files to pack.

use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use walkdir::{DirEntry, WalkDir};

use crate::error::{PackError, Result};

/// One regular file found under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Path relative to the source root, `/`-separated, never containing `..`.
    pub relative_path: String,
    /// Location used to open the file.
    pub source: PathBuf,
    /// Length in bytes at enumeration time.
    pub size: u64,
    pub modified: SystemTime,
    /// Unix permission bits, when the platform has them.
    pub mode: Option<u32>,
}

impl FileDescriptor {
    /// Build a descriptor from metadata already read for `source`.
    pub fn from_metadata(relative_path: String, source: PathBuf, metadata: &Metadata) -> Self {
        Self {
            relative_path,
            source,
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            mode: unix_mode(metadata),
        }
    }
}

#[cfg(unix)]
fn unix_mode(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &Metadata) -> Option<u32> {
    None
}

/// Deterministic, single-pass walk over a source tree.
///
/// Yields every regular file exactly once, sorted by name at each directory
/// level. Symlinks are not followed. A failure on one entry is yielded as an
/// error item and the walk continues with the next entry.
pub struct FileCatalog {
    root: PathBuf,
    walker: Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + Send>,
}

impl FileCatalog {
    /// Validate `root` and prepare the walk.
    ///
    /// When `exclude` names a directory inside the root (typically the target
    /// directory of a previous run) that subtree is skipped.
    pub fn open(root: &Path, exclude: Option<&Path>) -> Result<Self> {
        let metadata = std::fs::metadata(root).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PackError::SourceNotFound(root.to_path_buf()),
            _ => PackError::io(root, None, e),
        })?;
        if !metadata.is_dir() {
            return Err(PackError::SourceNotADirectory(root.to_path_buf()));
        }

        let root = root
            .canonicalize()
            .map_err(|e| PackError::io(root, None, e))?;
        let exclude = exclude.and_then(|p| p.canonicalize().ok());

        let walker = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| exclude.as_deref() != Some(entry.path()));

        Ok(Self {
            root,
            walker: Box::new(walker),
        })
    }

    /// Canonical source root the relative paths are computed against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn describe(&self, entry: &DirEntry) -> Result<FileDescriptor> {
        let path = entry.path();
        let metadata = entry
            .metadata()
            .map_err(|e| PackError::io(path, None, e.into()))?;
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| PackError::io(path, None, io::Error::other("entry escapes the source root")))?;

        let relative_path = relative_path_string(relative).ok_or_else(|| {
            PackError::io(
                path,
                None,
                io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
            )
        })?;

        Ok(FileDescriptor::from_metadata(
            relative_path,
            path.to_path_buf(),
            &metadata,
        ))
    }
}

impl Iterator for FileCatalog {
    type Item = Result<FileDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(&self.root).to_path_buf();
                    return Some(Err(PackError::io(path, None, e.into())));
                }
            };
            if entry.file_type().is_file() {
                return Some(self.describe(&entry));
            }
        }
    }
}

/// Join the normal components of `relative` with `/`.
///
/// Returns `None` when a component is not valid UTF-8: such a name cannot be
/// carried into an archive entry without changing it.
fn relative_path_string(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_str()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
