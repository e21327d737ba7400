//! Random-access byte sources.
//!
//! Output entries are read through [`ReadAt`] so that a byte range of a file
//! can be streamed in bounded chunks without a shared seek cursor.

mod local;
mod range;

pub use local::LocalFileReader;
pub use range::RangeReader;

use async_trait::async_trait;
use std::io;

use crate::error::Result;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read; `0` means end of data.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

#[async_trait]
impl ReadAt for Vec<u8> {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

/// Sequential byte stream feeding one output entry.
///
/// Errors are already attributed to the source file (`PackError::Io` with the
/// failing offset), so sinks can pass them through untouched.
#[async_trait]
pub trait EntrySource: Send {
    /// Fill `buf` with the next bytes; `Ok(0)` once the entry is complete.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Total number of bytes this source yields.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
