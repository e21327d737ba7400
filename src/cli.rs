use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{Compression, PackOptions};

#[derive(Parser, Debug)]
#[command(name = "layersplit")]
#[command(version)]
#[command(about = "Split a directory tree into size-bounded parts and ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  layersplit lambda-layer python              50 MiB parts as python1/, python_part_1.zip, ...\n  \
  layersplit -s 250MB -c stored src out       uncompressed 250 MB parts\n  \
  layersplit -n -v lambda-layer python        show the plan without writing anything")]
pub struct Cli {
    /// Directory to split
    #[arg(value_name = "SOURCE", env = "LAYERSPLIT_SOURCE_DIR")]
    pub source_dir: PathBuf,

    /// Directory receiving part folders and archives
    #[arg(value_name = "TARGET", env = "LAYERSPLIT_TARGET_DIR")]
    pub target_dir: PathBuf,

    /// Maximum size of one part (e.g. 52428800, 50MiB, 250MB)
    #[arg(short = 's', long, value_name = "SIZE", default_value = "50MiB",
          value_parser = parse_size, allow_hyphen_values = true, env = "LAYERSPLIT_MAX_PART_SIZE")]
    pub max_part_size: i64,

    /// Read buffer used when copying and splitting
    #[arg(short = 'b', long, value_name = "SIZE", default_value = "4MiB",
          value_parser = parse_size, allow_hyphen_values = true, env = "LAYERSPLIT_BUFFER_SIZE")]
    pub buffer_size: i64,

    /// Compression method for archive entries
    #[arg(short = 'c', long, value_enum, default_value_t = CompressionArg::Deflate,
          env = "LAYERSPLIT_COMPRESSION")]
    pub compression: CompressionArg,

    /// Deflate level, 0 (fastest) to 9 (smallest)
    #[arg(short = 'L', long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: u32,

    /// Name prefix of part folders and archives
    #[arg(short = 'p', long, default_value = crate::config::DEFAULT_PREFIX, env = "LAYERSPLIT_PREFIX")]
    pub prefix: String,

    /// Do not write part folders, only archives
    #[arg(long)]
    pub no_folders: bool,

    /// Do not write archives, only part folders
    #[arg(long)]
    pub no_archives: bool,

    /// Keep split parts of oversized files as plain files, without wrapping each in an archive
    #[arg(long)]
    pub no_wrap_split_parts: bool,

    /// Number of parts written concurrently
    #[arg(short = 'j', long, default_value_t = 1)]
    pub jobs: usize,

    /// Re-read every archive after writing it and check all CRCs
    #[arg(long)]
    pub verify: bool,

    /// Print the packing plan without writing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// More log output (-vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionArg {
    Stored,
    Deflate,
}

impl From<CompressionArg> for Compression {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::Stored => Compression::Stored,
            CompressionArg::Deflate => Compression::Deflate,
        }
    }
}

impl Cli {
    pub fn to_options(&self) -> PackOptions {
        PackOptions {
            max_part_size: self.max_part_size,
            buffer_size: self.buffer_size,
            compression: self.compression.into(),
            compression_level: self.level,
            prefix: self.prefix.clone(),
            write_folders: !self.no_folders,
            write_archives: !self.no_archives,
            wrap_split_parts: !self.no_wrap_split_parts,
            jobs: self.jobs,
            verify: self.verify,
            dry_run: self.dry_run,
            ..PackOptions::new(&self.source_dir, &self.target_dir)
        }
    }

    /// Default log filter for the requested verbosity.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

/// Parse a byte size such as `4096`, `50M`, `50MiB` or `250MB`.
///
/// `K`, `M`, `G` and the `KiB`/`MiB`/`GiB` forms are powers of 1024; `KB`,
/// `MB` and `GB` are powers of 1000. Negative values parse so that they can be
/// rejected later with a precise error.
pub fn parse_size(input: &str) -> Result<i64, String> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '-' || c == '+'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let number: i64 = number
        .parse()
        .map_err(|_| format!("'{input}' is not a size (expected e.g. 4096, 50MiB, 250MB)"))?;

    let multiplier: i64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kib" => 1 << 10,
        "m" | "mib" => 1 << 20,
        "g" | "gib" => 1 << 30,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        other => return Err(format!("unknown size unit '{other}' in '{input}'")),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{input}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("50M"), Ok(50 * 1024 * 1024));
        assert_eq!(parse_size("50MiB"), Ok(50 * 1024 * 1024));
        assert_eq!(parse_size("250MB"), Ok(250_000_000));
        assert_eq!(parse_size("4 KiB"), Ok(4096));
        assert_eq!(parse_size("1g"), Ok(1 << 30));
        assert_eq!(parse_size("0"), Ok(0));
        assert_eq!(parse_size("-5"), Ok(-5));
    }

    #[test]
    fn test_parse_size_errors() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("12 parsecs").is_err());
        assert!(parse_size("9223372036854775807G").is_err());
    }

    #[test]
    fn test_cli_to_options() {
        let cli = Cli::parse_from([
            "layersplit",
            "-s",
            "30",
            "--no-archives",
            "-p",
            "layer",
            "-j",
            "4",
            "src",
            "out",
        ]);
        let options = cli.to_options();
        assert_eq!(options.max_part_size, 30);
        assert_eq!(options.prefix, "layer");
        assert!(!options.write_archives);
        assert!(options.write_folders);
        assert_eq!(options.jobs, 4);
        assert_eq!(options.source_dir, PathBuf::from("src"));
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn test_negative_size_reaches_validation() {
        let cli = Cli::parse_from(["layersplit", "--max-part-size", "-1", "src", "out"]);
        assert_eq!(cli.max_part_size, -1);
        assert!(cli.to_options().build().is_err());
    }
}
