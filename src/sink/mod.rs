//! Destinations for output units.
//!
//! The materializer only talks to these traits: it opens one [`UnitWriter`]
//! per output unit, streams each entry into it, then closes it. Source errors
//! surface as [`PackError::Io`](crate::PackError::Io) unchanged; anything that
//! goes wrong on the destination side is reported as
//! [`PackError::ArchiveWrite`](crate::PackError::ArchiveWrite).

mod dir;
mod archive;

pub use dir::DirSink;
pub use archive::ZipSink;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::error::Result;
use crate::io::EntrySource;
use crate::materialize::OutputUnit;

#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Short label used in logs, e.g. `zip`.
    fn kind(&self) -> &'static str;

    /// Whether this sink materializes `unit` at all.
    fn accepts(&self, _unit: &OutputUnit) -> bool {
        true
    }

    async fn open(&self, unit: &OutputUnit) -> Result<Box<dyn UnitWriter>>;
}

#[async_trait]
pub trait UnitWriter: Send {
    /// Stream one entry; returns the number of source bytes written.
    ///
    /// When the source fails the partial entry is removed and the writer
    /// stays usable for the next entry.
    async fn write_entry(
        &mut self,
        entry_name: &str,
        source: &mut dyn EntrySource,
        modified: SystemTime,
        mode: Option<u32>,
    ) -> Result<u64>;

    /// Finalize the unit and return the artifact it produced.
    async fn close(self: Box<Self>) -> Result<PathBuf>;

    /// Discard the unit, removing whatever it already wrote.
    async fn abandon(self: Box<Self>);
}

/// Join a `/`-separated entry name onto `root`.
pub(crate) fn entry_path(root: &std::path::Path, entry_name: &str) -> PathBuf {
    entry_name
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}
