//! Slicing of files that do not fit in a single part.
//!
//! A file larger than the capacity is cut into consecutive byte ranges of
//! exactly `capacity` bytes, the last one holding the remainder. Ranges are
//! computed lazily and each one is streamed through a [`RangeReader`] in
//! `buffer_size` chunks, so peak memory never depends on the file size.

use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::FileDescriptor;
use crate::error::{PackError, Result};
use crate::io::{LocalFileReader, RangeReader};

/// One contiguous slice of an oversized file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPart {
    /// Relative path of the file this slice belongs to.
    pub owner: String,
    /// 1-based, contiguous.
    pub index: usize,
    pub offset: u64,
    pub len: u64,
}

impl SplitPart {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileSplitter {
    capacity: u64,
    buffer_size: usize,
}

impl FileSplitter {
    pub fn new(capacity: u64, buffer_size: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PackError::InvalidCapacity(0));
        }
        if buffer_size == 0 {
            return Err(PackError::InvalidBufferSize(0));
        }
        Ok(Self {
            capacity,
            buffer_size,
        })
    }

    /// Whether `file` must go through the splitter. A file of exactly
    /// `capacity` bytes is copied whole.
    pub fn needs_split(&self, file: &FileDescriptor) -> bool {
        file.size > self.capacity
    }

    /// Streaming chunk size callers should use when draining a part.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Lazily compute the parts covering `file`.
    pub fn split(&self, file: &FileDescriptor) -> SplitParts {
        SplitParts {
            owner: file.relative_path.clone(),
            size: file.size,
            capacity: self.capacity,
            offset: 0,
            index: 0,
        }
    }

    /// Open `file` once so that its parts can be streamed one after another.
    pub fn open(&self, file: &FileDescriptor) -> Result<SplitSource> {
        let reader =
            LocalFileReader::new(&file.source).map_err(|e| PackError::io(&file.source, Some(0), e))?;
        Ok(SplitSource {
            reader: Arc::new(reader),
            path: file.source.clone(),
        })
    }
}

/// Iterator over the [`SplitPart`]s of one file.
#[derive(Debug, Clone)]
pub struct SplitParts {
    owner: String,
    size: u64,
    capacity: u64,
    offset: u64,
    index: usize,
}

impl Iterator for SplitParts {
    type Item = SplitPart;

    fn next(&mut self) -> Option<SplitPart> {
        if self.offset >= self.size {
            return None;
        }
        let len = self.capacity.min(self.size - self.offset);
        self.index += 1;
        let part = SplitPart {
            owner: self.owner.clone(),
            index: self.index,
            offset: self.offset,
            len,
        };
        self.offset += len;
        Some(part)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.size - self.offset.min(self.size)).div_ceil(self.capacity);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SplitParts {}

/// An oversized file opened for splitting.
pub struct SplitSource {
    reader: Arc<LocalFileReader>,
    path: PathBuf,
}

impl SplitSource {
    /// Byte stream of one part. Parts share the open file handle but read at
    /// explicit offsets, one part at a time.
    pub fn part(&self, part: &SplitPart) -> RangeReader {
        RangeReader::new(self.reader.clone(), &self.path, part.offset, part.len)
    }
}
