//! Run configuration.
//!
//! [`PackOptions`] is the raw, user-facing form (sizes are signed so that a
//! negative value from the command line can be reported as such).
//! [`PackOptions::build`] validates it into an immutable [`PackConfig`] that
//! every component receives at construction time.

use std::path::PathBuf;

use crate::error::{PackError, Result};

/// Default capacity of one output unit: 50 MiB.
pub const DEFAULT_MAX_PART_SIZE: i64 = 50 * 1024 * 1024;

/// Default streaming chunk used when copying and splitting: 4 MiB.
pub const DEFAULT_BUFFER_SIZE: i64 = 4 * 1024 * 1024;

pub const DEFAULT_PREFIX: &str = "python";

/// Largest archive the ZIP writer can produce without ZIP64 records.
const ZIP32_LIMIT: u64 = 0xFFFF_FFFF;

/// Compression applied to archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    Stored,
    #[default]
    Deflate,
}

/// Unvalidated options, usually filled in from the command line.
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub max_part_size: i64,
    pub buffer_size: i64,
    pub compression: Compression,
    pub compression_level: u32,
    pub prefix: String,
    pub write_folders: bool,
    pub write_archives: bool,
    pub wrap_split_parts: bool,
    pub jobs: usize,
    pub verify: bool,
    pub dry_run: bool,
}

impl PackOptions {
    pub fn new(source_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
            max_part_size: DEFAULT_MAX_PART_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            compression: Compression::default(),
            compression_level: 6,
            prefix: DEFAULT_PREFIX.to_string(),
            write_folders: true,
            write_archives: true,
            wrap_split_parts: true,
            jobs: 1,
            verify: false,
            dry_run: false,
        }
    }

    pub fn max_part_size(mut self, bytes: i64) -> Self {
        self.max_part_size = bytes;
        self
    }

    pub fn buffer_size(mut self, bytes: i64) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Validate every option that does not need the filesystem.
    ///
    /// Source directory checks happen when the catalog is opened, so that
    /// capacity errors are reported before any I/O takes place.
    pub fn build(self) -> Result<PackConfig> {
        let max_part_size = u64::try_from(self.max_part_size)
            .ok()
            .filter(|v| *v > 0)
            .ok_or(PackError::InvalidCapacity(self.max_part_size))?;

        let buffer_size = usize::try_from(self.buffer_size)
            .ok()
            .filter(|v| *v > 0)
            .ok_or(PackError::InvalidBufferSize(self.buffer_size))?;

        if !self.write_folders && !self.write_archives {
            return Err(PackError::Config(
                "folders and archives are both disabled, nothing would be written".into(),
            ));
        }

        if self.jobs == 0 {
            return Err(PackError::Config("jobs must be at least 1".into()));
        }

        if self.compression_level > 9 {
            return Err(PackError::Config(format!(
                "compression level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }

        if self.prefix.is_empty()
            || self.prefix.contains(['/', '\\'])
            || self.prefix == "."
            || self.prefix == ".."
        {
            return Err(PackError::Config(format!(
                "prefix '{}' must be a plain, non-empty name",
                self.prefix
            )));
        }

        if self.write_archives && max_part_size >= ZIP32_LIMIT {
            return Err(PackError::Config(
                "maximum part size exceeds the 4 GiB ZIP limit, disable archives to use it".into(),
            ));
        }

        Ok(PackConfig {
            source_dir: self.source_dir,
            target_dir: self.target_dir,
            max_part_size,
            buffer_size,
            compression: self.compression,
            compression_level: self.compression_level,
            prefix: self.prefix,
            write_folders: self.write_folders,
            write_archives: self.write_archives,
            wrap_split_parts: self.wrap_split_parts,
            jobs: self.jobs,
            verify: self.verify,
            dry_run: self.dry_run,
        })
    }
}

/// Validated configuration for one run. Never mutated after [`PackOptions::build`].
#[derive(Debug, Clone)]
pub struct PackConfig {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Capacity of one output unit in bytes; always positive.
    pub max_part_size: u64,
    /// Chunk size for streaming reads; affects memory use only, never output.
    pub buffer_size: usize,
    pub compression: Compression,
    pub compression_level: u32,
    pub prefix: String,
    pub write_folders: bool,
    pub write_archives: bool,
    pub wrap_split_parts: bool,
    pub jobs: usize,
    pub verify: bool,
    pub dry_run: bool,
}

impl PackConfig {
    /// Folder name of bin `n`, e.g. `python3`.
    pub fn bin_folder(&self, index: usize) -> String {
        format!("{}{}", self.prefix, index)
    }

    /// Unit name of bin `n`, e.g. `python_part_3`.
    pub fn bin_unit_name(&self, index: usize) -> String {
        format!("{}_part_{}", self.prefix, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PackOptions {
        PackOptions::new("/src", "/out")
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = options().build().unwrap();
        assert_eq!(config.max_part_size, 50 * 1024 * 1024);
        assert_eq!(config.buffer_size, 4 * 1024 * 1024);
        assert_eq!(config.bin_folder(2), "python2");
        assert_eq!(config.bin_unit_name(2), "python_part_2");
    }

    #[test]
    fn test_zero_and_negative_capacity_rejected() {
        assert!(matches!(
            options().max_part_size(0).build(),
            Err(PackError::InvalidCapacity(0))
        ));
        assert!(matches!(
            options().max_part_size(-5).build(),
            Err(PackError::InvalidCapacity(-5))
        ));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        assert!(matches!(
            options().buffer_size(0).build(),
            Err(PackError::InvalidBufferSize(0))
        ));
    }

    #[test]
    fn test_nothing_to_write_rejected() {
        let mut opts = options();
        opts.write_folders = false;
        opts.write_archives = false;
        assert!(matches!(opts.build(), Err(PackError::Config(_))));
    }

    #[test]
    fn test_prefix_must_be_plain_name() {
        assert!(options().prefix("a/b").build().is_err());
        assert!(options().prefix("").build().is_err());
        assert!(options().prefix("..").build().is_err());
        assert!(options().prefix("layer").build().is_ok());
    }

    #[test]
    fn test_zip_limit_only_applies_with_archives() {
        let huge = 5 * 1024 * 1024 * 1024;
        assert!(options().max_part_size(huge).build().is_err());

        let mut opts = options().max_part_size(huge);
        opts.write_archives = false;
        assert!(opts.build().is_ok());
    }
}
