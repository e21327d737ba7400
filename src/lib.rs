//! # layersplit
//!
//! Split a directory tree into size-bounded parts so that large file
//! collections (AWS Lambda layers, deployment bundles) fit through channels
//! with a hard per-upload limit.
//!
//! A run walks the source tree in a deterministic order, packs whole files
//! greedily into bins of at most `max_part_size` bytes, and writes every bin
//! as a folder (`python1/`, `python2/`, ...) and a sibling ZIP archive
//! (`python_part_1.zip`, ...). A file that is larger than the limit by itself
//! is cut into `name.part1`, `name.part2`, ... slices, each optionally wrapped
//! in its own archive.
//!
//! ## Features
//!
//! - Order-preserving greedy packing; files are never reordered
//! - Streaming copies and splits with a bounded read buffer
//! - STORED or DEFLATE archives carrying modification times and Unix modes
//! - Optional verification of every written archive
//! - Per-file error isolation: one unreadable file does not fail the run
//!
//! ## Example
//!
//! ```no_run
//! use layersplit::PackOptions;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = PackOptions::new("lambda-layer", "python").max_part_size(50 * 1024 * 1024);
//!     let report = layersplit::run(options).await?;
//!     print!("{report}");
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod materialize;
pub mod packer;
pub mod pipeline;
pub mod report;
pub mod sink;
pub mod splitter;
pub mod zip;

pub use catalog::{FileCatalog, FileDescriptor};
pub use cli::Cli;
pub use config::{Compression, PackConfig, PackOptions};
pub use error::PackError;
pub use materialize::{OutputUnit, PartMaterializer, UnitEntry, UnitKind};
pub use packer::{pack, Bin, BinPacker};
pub use pipeline::{run, run_with_config};
pub use report::{PackReport, UnitReport};
pub use splitter::{FileSplitter, SplitPart};
