//! Error type shared by every stage of a pack run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while cataloguing, packing and materializing a tree.
///
/// The first group of variants are pre-flight failures: they abort the whole
/// run before any output is produced. The rest are scoped to one file or one
/// output unit and are collected into the run report instead.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("source path is not a directory: {}", .0.display())]
    SourceNotADirectory(PathBuf),

    #[error("maximum part size must be a positive number of bytes, got {0}")]
    InvalidCapacity(i64),

    #[error("buffer size must be a positive number of bytes, got {0}")]
    InvalidBufferSize(i64),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on '{}'{}: {source}", path.display(), offset.map(|o| format!(" at offset {o}")).unwrap_or_default())]
    Io {
        path: PathBuf,
        offset: Option<u64>,
        #[source]
        source: io::Error,
    },

    #[error("failed to write output unit '{unit}': {source}")]
    ArchiveWrite {
        unit: String,
        #[source]
        source: io::Error,
    },

    #[error("verification of '{}' failed: {reason}", archive.display())]
    Verify { archive: PathBuf, reason: String },
}

impl PackError {
    pub fn io(path: impl Into<PathBuf>, offset: Option<u64>, source: io::Error) -> Self {
        PackError::Io {
            path: path.into(),
            offset,
            source,
        }
    }

    pub fn archive_write(unit: impl Into<String>, source: io::Error) -> Self {
        PackError::ArchiveWrite {
            unit: unit.into(),
            source,
        }
    }

    /// Whether this error must abort the run rather than be recorded and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PackError::SourceNotFound(_)
                | PackError::SourceNotADirectory(_)
                | PackError::InvalidCapacity(_)
                | PackError::InvalidBufferSize(_)
                | PackError::Config(_)
        )
    }
}

pub type Result<T, E = PackError> = std::result::Result<T, E>;
