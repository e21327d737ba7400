//! Greedy, order-preserving bin packing.
//!
//! Files are taken in catalog order and appended to the open bin until the
//! next file would push it past capacity; the bin is then sealed and a new one
//! started. Nothing is reordered, so files that sit next to each other in the
//! tree usually end up in the same part.

use crate::catalog::FileDescriptor;
use crate::error::{PackError, Result};

/// A sealed group of whole files.
///
/// `total_size() <= capacity` holds for every bin except one holding a single
/// file that is larger than the capacity by itself. Such a bin is
/// [`oversized`](Bin::is_oversized) and its file gets split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    index: usize,
    files: Vec<FileDescriptor>,
    total_size: u64,
}

impl Bin {
    /// 1-based position of this bin in the packing result.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_oversized(&self, capacity: u64) -> bool {
        self.files.len() == 1 && self.total_size > capacity
    }
}

/// Incremental packer; feed it files one at a time.
#[derive(Debug)]
pub struct BinPacker {
    capacity: u64,
    sealed: usize,
    files: Vec<FileDescriptor>,
    total_size: u64,
}

impl BinPacker {
    pub fn new(capacity: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(PackError::InvalidCapacity(0));
        }
        Ok(Self {
            capacity,
            sealed: 0,
            files: Vec::new(),
            total_size: 0,
        })
    }

    /// Add the next file. Returns the previous bin if this file closed it.
    pub fn push(&mut self, file: FileDescriptor) -> Option<Bin> {
        let closed = if !self.files.is_empty()
            && self.total_size.saturating_add(file.size) > self.capacity
        {
            self.seal()
        } else {
            None
        };

        self.total_size = self.total_size.saturating_add(file.size);
        self.files.push(file);
        closed
    }

    /// Seal whatever is left once the input is exhausted.
    pub fn finish(mut self) -> Option<Bin> {
        self.seal()
    }

    fn seal(&mut self) -> Option<Bin> {
        if self.files.is_empty() {
            return None;
        }
        self.sealed += 1;
        Some(Bin {
            index: self.sealed,
            files: std::mem::take(&mut self.files),
            total_size: std::mem::replace(&mut self.total_size, 0),
        })
    }
}

/// Pack `files` into bins of at most `capacity` bytes.
///
/// An empty input gives an empty result.
pub fn pack<I>(files: I, capacity: u64) -> Result<Vec<Bin>>
where
    I: IntoIterator<Item = FileDescriptor>,
{
    let mut packer = BinPacker::new(capacity)?;
    let mut bins: Vec<Bin> = files.into_iter().filter_map(|f| packer.push(f)).collect();
    bins.extend(packer.finish());
    Ok(bins)
}
