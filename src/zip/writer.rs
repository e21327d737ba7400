//! Streaming ZIP writer.
//!
//! Entries are written one after another: local header with zeroed CRC and
//! sizes, then the (optionally deflated) data pulled chunk by chunk from an
//! [`EntrySource`], then the header is patched in place. The central directory
//! and the end record are appended by [`ZipWriter::finish`].
//!
//! Only classic (non-ZIP64) archives are produced; anything that would need
//! 64-bit fields is refused with `InvalidInput`.

use std::io::{self, SeekFrom, Write};
use std::path::Path;
use std::time::SystemTime;

use flate2::write::DeflateEncoder;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};

use crate::error::PackError;
use crate::io::EntrySource;

use super::structures::*;

/// Why an entry could not be added.
#[derive(Debug)]
pub enum EntryError {
    /// Reading the entry's data failed; the entry was rolled back and the
    /// archive is still consistent.
    Source(PackError),
    /// Writing the archive itself failed; the archive should be considered broken.
    Write(io::Error),
}

impl From<io::Error> for EntryError {
    fn from(value: io::Error) -> Self {
        EntryError::Write(value)
    }
}

pub struct ZipWriter {
    out: BufWriter<File>,
    offset: u64,
    method: CompressionMethod,
    level: u32,
    central: Vec<CentralDirectoryHeader>,
}

impl ZipWriter {
    /// Create (or truncate) the archive at `path`.
    pub async fn create(path: &Path, method: CompressionMethod, level: u32) -> io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            out: BufWriter::new(file),
            offset: 0,
            method,
            level,
            central: Vec::new(),
        })
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> usize {
        self.central.len()
    }

    /// Append one entry, streaming its data from `source` through `buf`.
    ///
    /// Returns the number of uncompressed bytes written.
    pub async fn write_entry(
        &mut self,
        name: &str,
        source: &mut dyn EntrySource,
        modified: SystemTime,
        mode: Option<u32>,
        buf: &mut [u8],
    ) -> Result<u64, EntryError> {
        let start = self.offset;
        let lfh_offset = zip32(start, "archive offset")?;
        if self.central.len() >= MAX_ENTRIES {
            return Err(too_large("entry count").into());
        }

        let flags = if name.is_ascii() { 0 } else { FLAG_UTF8 };
        let dos_time = DosDateTime::from_system_time(modified);
        let extra = unix_mtime(modified)
            .map(extended_timestamp)
            .unwrap_or_default();
        let header = LocalFileHeader {
            flags,
            method: self.method,
            modified: dos_time,
            file_name: name,
            extra: &extra,
        }
        .to_bytes()?;
        self.emit(&header).await?;

        let mut crc = crc32fast::Hasher::new();
        let mut uncompressed: u64 = 0;
        let data_start = self.offset;
        let mut encoder = match self.method {
            CompressionMethod::Deflate => Some(DeflateEncoder::new(
                Vec::new(),
                flate2::Compression::new(self.level),
            )),
            _ => None,
        };

        loop {
            let n = match source.read_chunk(buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.rollback(start).await?;
                    return Err(EntryError::Source(e));
                }
            };
            let chunk = &buf[..n];
            crc.update(chunk);
            uncompressed += n as u64;
            match encoder.as_mut() {
                Some(encoder) => {
                    encoder.write_all(chunk)?;
                    let compressed = std::mem::take(encoder.get_mut());
                    self.emit(&compressed).await?;
                }
                None => self.emit(chunk).await?,
            }
        }
        if let Some(encoder) = encoder {
            let tail = encoder.finish()?;
            self.emit(&tail).await?;
        }

        let crc32 = crc.finalize();
        let compressed_size = zip32(self.offset - data_start, "compressed entry size")?;
        let uncompressed_size = zip32(uncompressed, "entry size")?;
        self.patch_sizes(start, crc32, compressed_size, uncompressed_size)
            .await?;

        self.central.push(CentralDirectoryHeader {
            file_name: name.to_string(),
            flags,
            method: self.method,
            modified: dos_time,
            crc32,
            compressed_size,
            uncompressed_size,
            extra,
            unix_mode: mode.unwrap_or(DEFAULT_FILE_MODE) & 0o7777,
            lfh_offset,
        });
        Ok(uncompressed)
    }

    /// Write the central directory and end record; returns the archive size.
    pub async fn finish(mut self) -> io::Result<u64> {
        let cd_offset = zip32(self.offset, "central directory offset")?;
        let mut cd = Vec::new();
        for header in &self.central {
            header.write_to(&mut cd)?;
        }
        let cd_size = zip32(cd.len() as u64, "central directory size")?;
        let entries = u16::try_from(self.central.len()).map_err(|_| too_large("entry count"))?;

        self.emit(&cd).await?;
        let eocd = EndOfCentralDirectory::new(entries, cd_size, cd_offset).to_bytes()?;
        self.emit(&eocd).await?;
        self.out.flush().await?;
        self.out.get_mut().sync_all().await?;
        Ok(self.offset)
    }

    async fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes).await?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Fill in CRC and sizes of the local header at `start`.
    async fn patch_sizes(
        &mut self,
        start: u64,
        crc32: u32,
        compressed: u32,
        uncompressed: u32,
    ) -> io::Result<()> {
        let mut fields = [0u8; 12];
        fields[0..4].copy_from_slice(&crc32.to_le_bytes());
        fields[4..8].copy_from_slice(&compressed.to_le_bytes());
        fields[8..12].copy_from_slice(&uncompressed.to_le_bytes());

        self.out
            .seek(SeekFrom::Start(start + LFH_CRC_OFFSET))
            .await?;
        self.out.write_all(&fields).await?;
        self.out.seek(SeekFrom::Start(self.offset)).await?;
        Ok(())
    }

    /// Drop everything written from `start` on.
    async fn rollback(&mut self, start: u64) -> io::Result<()> {
        self.out.flush().await?;
        self.out.get_mut().set_len(start).await?;
        self.out.seek(SeekFrom::Start(start)).await?;
        self.offset = start;
        Ok(())
    }
}

fn zip32(value: u64, what: &str) -> io::Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v != u32::MAX)
        .ok_or_else(|| too_large(what))
}

fn too_large(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{what} exceeds the ZIP limit (ZIP64 output is not supported)"),
    )
}
