//! ZIP archive writing and reading.
//!
//! ## Architecture
//!
//! - [`structures`]: ZIP format records (local and central headers, EOCD, DOS time)
//! - [`writer`]: streaming writer producing one archive per output unit
//! - [`reader`]: central-directory reader used to verify finished archives
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! ## Supported Features
//!
//! - STORED and DEFLATE compression methods
//! - UTF-8 file names
//! - Extended timestamp ("UT") extra field and Unix permission bits
//!
//! ## Limitations
//!
//! - No ZIP64: archives and entries must stay below 4 GiB
//! - No encryption, no multi-disk archives

mod reader;
mod structures;
mod writer;

pub use reader::ZipReader;
pub use structures::*;
pub use writer::{EntryError, ZipWriter};
