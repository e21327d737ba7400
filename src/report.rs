//! Outcome of a run: what was written and what was skipped.

use std::fmt;
use std::path::PathBuf;

use crate::error::PackError;
use crate::materialize::{OutputUnit, UnitKind};

/// What happened to one output unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub name: String,
    /// Index of the bin the unit belongs to.
    pub bin: usize,
    /// Split part index, for units holding a slice of an oversized file.
    pub part: Option<usize>,
    /// Entries that made it into every accepting sink.
    pub entries: usize,
    pub bytes: u64,
    /// Folders and archives produced for the unit.
    pub artifacts: Vec<PathBuf>,
    /// False when any failure was recorded against the unit.
    pub complete: bool,
}

impl UnitReport {
    /// Report for a unit that is only planned (dry run).
    pub fn planned(unit: &OutputUnit) -> Self {
        Self {
            name: unit.name.clone(),
            bin: unit.bin,
            part: match &unit.kind {
                UnitKind::Bin => None,
                UnitKind::Split(part) => Some(part.index),
            },
            entries: unit.entries.len(),
            bytes: unit.total_len(),
            artifacts: Vec::new(),
            complete: true,
        }
    }
}

/// A non-fatal error, with the unit it happened in when there was one.
#[derive(Debug)]
pub struct Failure {
    pub unit: Option<String>,
    pub error: PackError,
}

/// Units and failures produced while materializing one bin.
#[derive(Debug, Default)]
pub struct BinOutcome {
    pub units: Vec<UnitReport>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Default)]
pub struct PackReport {
    pub files_found: usize,
    pub bytes_found: u64,
    pub bins: usize,
    pub units: Vec<UnitReport>,
    pub failures: Vec<Failure>,
    pub dry_run: bool,
}

impl PackReport {
    pub fn absorb(&mut self, outcome: BinOutcome) {
        self.units.extend(outcome.units);
        self.failures.extend(outcome.failures);
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &PathBuf> {
        self.units.iter().flat_map(|u| u.artifacts.iter())
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for PackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.files_found == 0 {
            return writeln!(f, "No files found, nothing to do.");
        }
        writeln!(
            f,
            "{} file(s), {} packed into {} part(s), {} output unit(s){}",
            self.files_found,
            format_size(self.bytes_found),
            self.bins,
            self.units.len(),
            if self.dry_run { " (dry run)" } else { "" }
        )?;
        for unit in &self.units {
            let status = if unit.complete { "" } else { "  [incomplete]" };
            writeln!(
                f,
                "  {:<40} {:>6} entr{}  {:>12}{}",
                unit.name,
                unit.entries,
                if unit.entries == 1 { "y  " } else { "ies" },
                format_size(unit.bytes),
                status
            )?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "{} file(s) or unit(s) skipped:", self.failures.len())?;
            for failure in &self.failures {
                match &failure.unit {
                    Some(unit) => writeln!(f, "  [{unit}] {}", failure.error)?,
                    None => writeln!(f, "  {}", failure.error)?,
                }
            }
        }
        Ok(())
    }
}

/// Format a byte size into a human-readable string.
///
/// ```
/// use layersplit::report::format_size;
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// assert_eq!(format_size(1048576), "1.00 MB");
/// ```
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
