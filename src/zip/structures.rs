use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, Local, Timelike};
use std::io::{self, Cursor};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::Compression;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

impl From<Compression> for CompressionMethod {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflate => CompressionMethod::Deflate,
        }
    }
}

/// "Version needed to extract": 2.0, deflate without ZIP64.
pub const VERSION_NEEDED: u16 = 20;
/// "Version made by": Unix host, format version 2.0.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// General purpose flag bit 11: file name is UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;
/// Extended timestamp extra field ("UT").
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;
/// Unix regular file type bits for the external attributes.
const S_IFREG: u32 = 0o100000;
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// MS-DOS date and time as stored in ZIP headers (local time, 2 second resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const MIN: DosDateTime = DosDateTime {
        time: 0,
        date: (1 << 5) | 1,
    };
    /// 2107-12-31 23:59:58, the latest representable instant.
    pub const MAX: DosDateTime = DosDateTime {
        time: (23 << 11) | (59 << 5) | 29,
        date: (127 << 9) | (12 << 5) | 31,
    };

    /// Convert to the local-time DOS representation, clamping out-of-range years.
    pub fn from_system_time(time: SystemTime) -> Self {
        let local: DateTime<Local> = time.into();
        let year = local.year();
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self::MAX;
        }
        Self {
            time: ((local.hour() as u16) << 11)
                | ((local.minute() as u16) << 5)
                | (local.second() as u16 / 2),
            date: (((year - 1980) as u16) << 9) | ((local.month() as u16) << 5) | local.day() as u16,
        }
    }

    /// Parse modification date to (year, month, day)
    pub fn date_parts(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn time_parts(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// Seconds since the Unix epoch as stored in the "UT" extra field, if representable.
pub fn unix_mtime(time: SystemTime) -> Option<u32> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u32::try_from(d.as_secs()).ok())
}

/// "UT" extra field carrying only the modification time.
pub fn extended_timestamp(mtime: u32) -> Vec<u8> {
    let mut extra = Vec::with_capacity(9);
    extra.extend_from_slice(&EXTENDED_TIMESTAMP_ID.to_le_bytes());
    extra.extend_from_slice(&5u16.to_le_bytes());
    extra.push(1); // mtime present
    extra.extend_from_slice(&mtime.to_le_bytes());
    extra
}

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;
/// Offset of the CRC-32 field inside the LFH; sizes follow it.
pub const LFH_CRC_OFFSET: u64 = 14;

/// Local File Header as written before each entry's data.
///
/// CRC and sizes are written as zero and patched once the data is known.
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub file_name: &'a str,
    pub extra: &'a [u8],
}

impl LocalFileHeader<'_> {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(LFH_SIZE + self.file_name.len() + self.extra.len());
        out.extend_from_slice(LFH_SIGNATURE);
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.method.as_u16())?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        out.write_u32::<LittleEndian>(0)?; // crc32
        out.write_u32::<LittleEndian>(0)?; // compressed size
        out.write_u32::<LittleEndian>(0)?; // uncompressed size
        out.write_u16::<LittleEndian>(field_len(self.file_name.len())?)?;
        out.write_u16::<LittleEndian>(field_len(self.extra.len())?)?;
        out.extend_from_slice(self.file_name.as_bytes());
        out.extend_from_slice(self.extra);
        Ok(out)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
/// Most entries a classic archive can list; 0xFFFF in the end record means ZIP64.
pub const MAX_ENTRIES: usize = 0xFFFE;

/// Everything the central directory needs to know about a written entry.
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub file_name: String,
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub extra: Vec<u8>,
    pub unix_mode: u32,
    pub lfh_offset: u32,
}

impl CentralDirectoryHeader {
    pub fn write_to(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.extend_from_slice(CDFH_SIGNATURE);
        out.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.method.as_u16())?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size)?;
        out.write_u16::<LittleEndian>(field_len(self.file_name.len())?)?;
        out.write_u16::<LittleEndian>(field_len(self.extra.len())?)?;
        out.write_u16::<LittleEndian>(0)?; // comment length
        out.write_u16::<LittleEndian>(0)?; // disk number start
        out.write_u16::<LittleEndian>(0)?; // internal attributes
        out.write_u32::<LittleEndian>((S_IFREG | self.unix_mode) << 16)?;
        out.write_u32::<LittleEndian>(self.lfh_offset)?;
        out.extend_from_slice(self.file_name.as_bytes());
        out.extend_from_slice(&self.extra);
        Ok(())
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Single-disk record for `entries` entries, without comment.
    pub fn new(entries: u16, cd_size: u32, cd_offset: u32) -> Self {
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
            comment_len: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(invalid_data("invalid end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(self.comment_len)?;
        Ok(out)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub modified: DosDateTime,
    /// Exact modification time from the "UT" extra field, when present.
    pub unix_mtime: Option<u32>,
    /// Permission bits, when the archive was made on a Unix host.
    pub unix_mode: Option<u32>,
}

impl ZipFileEntry {
    pub fn modified_time(&self) -> Option<SystemTime> {
        self.unix_mtime
            .map(|secs| UNIX_EPOCH + Duration::from_secs(u64::from(secs)))
    }
}

/// Length of a variable-size header field, which ZIP stores in 16 bits.
fn field_len(len: usize) -> io::Result<u16> {
    u16::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("header field of {len} bytes exceeds the ZIP limit"),
        )
    })
}

pub(crate) fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
