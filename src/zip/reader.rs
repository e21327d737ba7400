//! ZIP reader used to check archives after they are written.
//!
//! Archives are read from the end: the End of Central Directory record gives
//! the location of the central directory, which lists every entry. Entry data
//! is then streamed from its local header through an optional inflater into
//! any [`Write`] sink.

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::write::DeflateDecoder;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
const MAX_COMMENT_SIZE: u64 = 65535;

/// Chunk size used when streaming entry data.
const READ_CHUNK: usize = 64 * 1024;

pub struct ZipReader<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipReader<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    async fn find_eocd(&self) -> io::Result<EndOfCentralDirectory> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(invalid_data("file is too small to be a ZIP archive"));
        }

        // Common case: no archive comment, the record is the last 22 bytes.
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.read_exact_at(self.size - eocd_size, &mut buf).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            return EndOfCentralDirectory::from_bytes(&buf);
        }

        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;
        let mut buf = vec![0u8; search_size as usize];
        self.read_exact_at(search_start, &mut buf).await?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    return EndOfCentralDirectory::from_bytes(&buf[i..]);
                }
            }
        }

        Err(invalid_data("end of central directory record not found"))
    }

    /// List all entries from the central directory.
    pub async fn list_entries(&self) -> io::Result<Vec<ZipFileEntry>> {
        let eocd = self.find_eocd().await?;
        if eocd.is_zip64() {
            return Err(invalid_data("ZIP64 archives are not supported"));
        }

        let mut cd_data = vec![0u8; eocd.cd_size as usize];
        self.read_exact_at(u64::from(eocd.cd_offset), &mut cd_data)
            .await?;

        let mut cursor = Cursor::new(cd_data.as_slice());
        (0..eocd.total_entries)
            .map(|_| parse_cdfh(&mut cursor))
            .collect()
    }

    /// Offset of the first data byte of `entry`, past its local header.
    pub async fn data_offset(&self, entry: &ZipFileEntry) -> io::Result<u64> {
        let mut lfh = [0u8; LFH_SIZE];
        self.read_exact_at(entry.lfh_offset, &mut lfh).await?;
        if &lfh[0..4] != LFH_SIGNATURE {
            return Err(invalid_data(format!(
                "invalid local file header for '{}'",
                entry.file_name
            )));
        }
        let name_len = u64::from(u16::from_le_bytes([lfh[26], lfh[27]]));
        let extra_len = u64::from(u16::from_le_bytes([lfh[28], lfh[29]]));
        Ok(entry.lfh_offset + LFH_SIZE as u64 + name_len + extra_len)
    }

    /// Decompress `entry` into `out`, returning `out` once done.
    pub async fn extract_to<W: Write>(&self, entry: &ZipFileEntry, out: W) -> io::Result<W> {
        let mut sink = match entry.compression_method {
            CompressionMethod::Stored => EntrySink::Stored(out),
            CompressionMethod::Deflate => EntrySink::Deflate(DeflateDecoder::new(out)),
            CompressionMethod::Unknown(m) => {
                return Err(invalid_data(format!(
                    "unsupported compression method {m} for '{}'",
                    entry.file_name
                )));
            }
        };

        let mut offset = self.data_offset(entry).await?;
        let end = offset + entry.compressed_size;
        let mut buf = vec![0u8; READ_CHUNK];
        while offset < end {
            let want = buf.len().min((end - offset) as usize);
            self.read_exact_at(offset, &mut buf[..want]).await?;
            sink.write_all(&buf[..want])?;
            offset += want as u64;
        }

        match sink {
            EntrySink::Stored(out) => Ok(out),
            EntrySink::Deflate(decoder) => decoder.finish(),
        }
    }

    /// Read a whole entry into memory.
    pub async fn read_entry(&self, entry: &ZipFileEntry) -> io::Result<Vec<u8>> {
        self.extract_to(entry, Vec::new()).await
    }

    /// Decompress `entry` and compare its length and CRC-32 with the header.
    pub async fn check_entry(&self, entry: &ZipFileEntry) -> io::Result<()> {
        let checked = self.extract_to(entry, CrcCounter::default()).await?;
        if checked.len != entry.uncompressed_size {
            return Err(invalid_data(format!(
                "'{}' holds {} bytes, header says {}",
                entry.file_name, checked.len, entry.uncompressed_size
            )));
        }
        let crc = checked.hasher.finalize();
        if crc != entry.crc32 {
            return Err(invalid_data(format!(
                "'{}' has CRC {crc:08x}, header says {:08x}",
                entry.file_name, entry.crc32
            )));
        }
        Ok(())
    }

    async fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.reader.read_at(offset, buf).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "archive is truncated",
                ));
            }
            offset += n as u64;
            buf = &mut buf[n..];
        }
        Ok(())
    }
}

/// Parse a Central Directory File Header from a cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> io::Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(invalid_data("invalid central directory file header"));
    }

    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let time = cursor.read_u16::<LittleEndian>()?;
    let date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let external_attrs = cursor.read_u32::<LittleEndian>()?;
    let lfh_offset = cursor.read_u32::<LittleEndian>()?;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra)?;
    cursor.set_position(cursor.position() + u64::from(file_comment_length));

    let unix_mode = (version_made_by >> 8 == 3).then_some((external_attrs >> 16) & 0o7777);

    Ok(ZipFileEntry {
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size: u64::from(compressed_size),
        uncompressed_size: u64::from(uncompressed_size),
        crc32,
        lfh_offset: u64::from(lfh_offset),
        modified: DosDateTime { time, date },
        unix_mtime: find_mtime(&extra)?,
        unix_mode,
    })
}

/// Modification time from an extended timestamp field, if the extra block has one.
fn find_mtime(extra: &[u8]) -> io::Result<Option<u32>> {
    let mut cursor = Cursor::new(extra);
    while cursor.position() + 4 <= extra.len() as u64 {
        let id = cursor.read_u16::<LittleEndian>()?;
        let size = u64::from(cursor.read_u16::<LittleEndian>()?);
        let body_start = cursor.position();
        if id == EXTENDED_TIMESTAMP_ID && size >= 5 {
            let flags = cursor.read_u8()?;
            if flags & 1 == 1 {
                return Ok(Some(cursor.read_u32::<LittleEndian>()?));
            }
        }
        cursor.set_position(body_start + size);
    }
    Ok(None)
}

enum EntrySink<W: Write> {
    Stored(W),
    Deflate(DeflateDecoder<W>),
}

impl<W: Write> EntrySink<W> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            EntrySink::Stored(out) => out.write_all(data),
            EntrySink::Deflate(decoder) => decoder.write_all(data),
        }
    }
}

/// Writer that only keeps a running CRC-32 and byte count.
#[derive(Default)]
struct CrcCounter {
    hasher: crc32fast::Hasher,
    len: u64,
}

impl Write for CrcCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
