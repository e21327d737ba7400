use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;

use super::{entry_path, ArchiveSink, UnitWriter};
use crate::config::PackConfig;
use crate::error::{PackError, Result};
use crate::io::{EntrySource, LocalFileReader};
use crate::materialize::{OutputUnit, UnitKind};
use crate::zip::{CompressionMethod, EntryError, ZipReader, ZipWriter, MAX_ENTRIES};

/// One ZIP archive per output unit, written to `{target}/{unit name}.zip`.
///
/// Entry names are relative to the target root, so extracting every archive
/// there rebuilds the folder layout.
pub struct ZipSink {
    target: PathBuf,
    method: CompressionMethod,
    level: u32,
    buffer_size: usize,
    wrap_split_parts: bool,
    verify: bool,
}

impl ZipSink {
    pub fn new(config: &PackConfig) -> Self {
        Self {
            target: config.target_dir.clone(),
            method: config.compression.into(),
            level: config.compression_level,
            buffer_size: config.buffer_size,
            wrap_split_parts: config.wrap_split_parts,
            verify: config.verify,
        }
    }

    pub fn archive_path(&self, unit: &OutputUnit) -> PathBuf {
        entry_path(&self.target, &format!("{}.zip", unit.name))
    }
}

#[async_trait]
impl ArchiveSink for ZipSink {
    fn kind(&self) -> &'static str {
        "zip"
    }

    fn accepts(&self, unit: &OutputUnit) -> bool {
        match unit.kind {
            UnitKind::Bin => true,
            UnitKind::Split(_) => self.wrap_split_parts,
        }
    }

    async fn open(&self, unit: &OutputUnit) -> Result<Box<dyn UnitWriter>> {
        if unit.entries.len() > MAX_ENTRIES {
            return Err(PackError::archive_write(
                &unit.name,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "{} entries do not fit in one archive (at most {MAX_ENTRIES} without ZIP64)",
                        unit.entries.len()
                    ),
                ),
            ));
        }
        let path = self.archive_path(unit);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PackError::archive_write(&unit.name, e))?;
        }
        let writer = ZipWriter::create(&path, self.method, self.level)
            .await
            .map_err(|e| PackError::archive_write(&unit.name, e))?;

        Ok(Box::new(ZipUnitWriter {
            unit: unit.name.clone(),
            path,
            writer,
            buf: vec![0u8; self.buffer_size],
            verify: self.verify,
            written: Vec::new(),
        }))
    }
}

struct ZipUnitWriter {
    unit: String,
    path: PathBuf,
    writer: ZipWriter,
    buf: Vec<u8>,
    verify: bool,
    written: Vec<(String, u64)>,
}

#[async_trait]
impl UnitWriter for ZipUnitWriter {
    async fn write_entry(
        &mut self,
        entry_name: &str,
        source: &mut dyn EntrySource,
        modified: SystemTime,
        mode: Option<u32>,
    ) -> Result<u64> {
        let written = self
            .writer
            .write_entry(entry_name, source, modified, mode, &mut self.buf)
            .await
            .map_err(|e| match e {
                EntryError::Source(e) => e,
                EntryError::Write(e) => PackError::archive_write(&self.unit, e),
            })?;
        debug!("zipped {} into {} ({} bytes)", entry_name, self.path.display(), written);
        self.written.push((entry_name.to_string(), written));
        Ok(written)
    }

    async fn close(self: Box<Self>) -> Result<PathBuf> {
        let ZipUnitWriter {
            unit,
            path,
            writer,
            verify,
            written,
            ..
        } = *self;
        writer
            .finish()
            .await
            .map_err(|e| PackError::archive_write(&unit, e))?;
        if verify {
            verify_archive(&path, &written).await?;
            debug!("verified {}", path.display());
        }
        Ok(path)
    }

    async fn abandon(self: Box<Self>) {
        let path = self.path.clone();
        drop(self);
        let _ = fs::remove_file(&path).await;
    }
}

/// Re-read a finished archive and check it holds exactly `expected`, intact.
pub(crate) async fn verify_archive(path: &Path, expected: &[(String, u64)]) -> Result<()> {
    let fail = |reason: String| PackError::Verify {
        archive: path.to_path_buf(),
        reason,
    };

    let reader = LocalFileReader::new(path).map_err(|e| fail(e.to_string()))?;
    let reader = ZipReader::new(Arc::new(reader));
    let entries = reader
        .list_entries()
        .await
        .map_err(|e| fail(e.to_string()))?;

    if entries.len() != expected.len() {
        return Err(fail(format!(
            "expected {} entries, found {}",
            expected.len(),
            entries.len()
        )));
    }
    for (entry, (name, size)) in entries.iter().zip(expected) {
        if entry.file_name != *name || entry.uncompressed_size != *size {
            return Err(fail(format!(
                "expected '{name}' ({size} bytes), found '{}' ({} bytes)",
                entry.file_name, entry.uncompressed_size
            )));
        }
        reader
            .check_entry(entry)
            .await
            .map_err(|e| fail(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackOptions;
    use crate::materialize::UnitEntry;

    fn unit(entries: usize) -> OutputUnit {
        let entries = (0..entries)
            .map(|i| UnitEntry {
                entry_name: format!("python1/f{i}"),
                relative_path: format!("f{i}"),
                source: PathBuf::from(format!("/src/f{i}")),
                offset: 0,
                len: 0,
                modified: SystemTime::UNIX_EPOCH,
                mode: None,
            })
            .collect();
        OutputUnit {
            name: "python_part_1".into(),
            bin: 1,
            folder: "python1".into(),
            kind: UnitKind::Bin,
            entries,
        }
    }

    #[tokio::test]
    async fn test_too_many_entries_refused_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let config = PackOptions::new("/src", dir.path()).build().unwrap();
        let sink = ZipSink::new(&config);
        let unit = unit(MAX_ENTRIES + 1);

        match sink.open(&unit).await {
            Err(PackError::ArchiveWrite { unit, source }) => {
                assert_eq!(unit, "python_part_1");
                assert_eq!(source.kind(), std::io::ErrorKind::InvalidInput);
            }
            Err(other) => panic!("expected ArchiveWrite, got {other}"),
            Ok(_) => panic!("expected the unit to be refused"),
        }
        assert!(!sink.archive_path(&unit).exists());
    }

    #[tokio::test]
    async fn test_empty_unit_gives_valid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = PackOptions::new("/src", dir.path());
        options.verify = true;
        let sink = ZipSink::new(&options.build().unwrap());
        let unit = unit(0);

        let writer = sink.open(&unit).await.unwrap();
        let path = writer.close().await.unwrap();
        assert_eq!(path, dir.path().join("python_part_1.zip"));
    }
}
