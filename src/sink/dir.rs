use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{entry_path, ArchiveSink, UnitWriter};
use crate::error::{PackError, Result};
use crate::io::EntrySource;
use crate::materialize::{OutputUnit, UnitKind};

/// Plain copy into the target tree: entry `python1/lib/a.py` lands at
/// `{target}/python1/lib/a.py`, with its modification time and mode restored.
pub struct DirSink {
    target: PathBuf,
    buffer_size: usize,
}

impl DirSink {
    pub fn new(target: impl Into<PathBuf>, buffer_size: usize) -> Self {
        Self {
            target: target.into(),
            buffer_size,
        }
    }
}

#[async_trait]
impl ArchiveSink for DirSink {
    fn kind(&self) -> &'static str {
        "folder"
    }

    async fn open(&self, unit: &OutputUnit) -> Result<Box<dyn UnitWriter>> {
        let artifact = match (&unit.kind, unit.entries.first()) {
            (UnitKind::Split(_), Some(entry)) => entry_path(&self.target, &entry.entry_name),
            _ => self.target.join(&unit.folder),
        };
        fs::create_dir_all(self.target.join(&unit.folder))
            .await
            .map_err(|e| PackError::archive_write(&unit.name, e))?;

        Ok(Box::new(DirUnitWriter {
            unit: unit.name.clone(),
            target: self.target.clone(),
            artifact,
            buf: vec![0u8; self.buffer_size],
            written: Vec::new(),
        }))
    }
}

struct DirUnitWriter {
    unit: String,
    target: PathBuf,
    artifact: PathBuf,
    buf: Vec<u8>,
    written: Vec<PathBuf>,
}

impl DirUnitWriter {
    fn write_err(&self, e: std::io::Error) -> PackError {
        PackError::archive_write(&self.unit, e)
    }
}

#[async_trait]
impl UnitWriter for DirUnitWriter {
    async fn write_entry(
        &mut self,
        entry_name: &str,
        source: &mut dyn EntrySource,
        modified: SystemTime,
        mode: Option<u32>,
    ) -> Result<u64> {
        let dest = entry_path(&self.target, entry_name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_err(e))?;
        }

        let mut file = create_overwriting(&dest)
            .await
            .map_err(|e| self.write_err(e))?;
        let mut written = 0u64;
        loop {
            let n = match source.read_chunk(&mut self.buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&dest).await;
                    return Err(e);
                }
            };
            file.write_all(&self.buf[..n])
                .await
                .map_err(|e| self.write_err(e))?;
            written += n as u64;
        }
        file.flush().await.map_err(|e| self.write_err(e))?;

        let file = file.into_std().await;
        file.set_modified(modified).map_err(|e| self.write_err(e))?;
        if let Some(mode) = mode {
            set_mode(&file, mode).map_err(|e| self.write_err(e))?;
        }

        debug!("copied {} ({} bytes)", dest.display(), written);
        self.written.push(dest);
        Ok(written)
    }

    async fn close(self: Box<Self>) -> Result<PathBuf> {
        Ok(self.artifact)
    }

    async fn abandon(self: Box<Self>) {
        for path in &self.written {
            let _ = fs::remove_file(path).await;
        }
    }
}

/// Create `path`, replacing a read-only leftover from an earlier run.
async fn create_overwriting(path: &Path) -> std::io::Result<fs::File> {
    match fs::File::create(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && path.is_file() => {
            fs::remove_file(path).await?;
            fs::File::create(path).await
        }
        other => other,
    }
}

#[cfg(unix)]
fn set_mode(file: &std::fs::File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &std::fs::File, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
