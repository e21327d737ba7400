use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{EntrySource, LocalFileReader, ReadAt};
use crate::error::{PackError, Result};

/// Streams the byte range `[offset, offset + len)` of a file.
///
/// Every read goes through [`ReadAt::read_at`] at the current position, so
/// several readers over the same shared file never disturb each other.
pub struct RangeReader<R: ReadAt = LocalFileReader> {
    reader: Arc<R>,
    path: PathBuf,
    pos: u64,
    end: u64,
    len: u64,
}

impl RangeReader<LocalFileReader> {
    /// Open `path` and stream `len` bytes starting at `offset`.
    pub fn open(path: &Path, offset: u64, len: u64) -> Result<Self> {
        let reader = LocalFileReader::new(path).map_err(|e| PackError::io(path, None, e))?;
        Ok(Self::new(Arc::new(reader), path, offset, len))
    }
}

impl<R: ReadAt> RangeReader<R> {
    pub fn new(reader: Arc<R>, path: impl Into<PathBuf>, offset: u64, len: u64) -> Self {
        Self {
            reader,
            path: path.into(),
            pos: offset,
            end: offset.saturating_add(len),
            len,
        }
    }

    /// Absolute file offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

#[async_trait]
impl<R: ReadAt> EntrySource for RangeReader<R> {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.end - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let n = loop {
            match self.reader.read_at(self.pos, &mut buf[..want]).await {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PackError::io(&self.path, Some(self.pos), e)),
            }
        };
        if n == 0 {
            return Err(PackError::io(
                &self.path,
                Some(self.pos),
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file ended before its catalogued size",
                ),
            ));
        }

        self.pos += n as u64;
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.len
    }
}
