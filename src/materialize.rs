//! Turning sealed bins into output units and writing them out.
//!
//! A regular bin `n` becomes one unit, `{prefix}_part_{n}`, whose entries are
//! `{prefix}{n}/{relative path}`. An oversized bin becomes one unit per split
//! part, `{relative path}.part{k}`, holding the single entry
//! `{prefix}{n}/{relative path}.part{k}`. Each unit is handed to every sink
//! that accepts it.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::config::PackConfig;
use crate::error::{PackError, Result};
use crate::io::RangeReader;
use crate::packer::Bin;
use crate::report::{BinOutcome, Failure, UnitReport};
use crate::sink::{ArchiveSink, DirSink, UnitWriter, ZipSink};
use crate::splitter::{FileSplitter, SplitPart, SplitSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// Whole files of one bin.
    Bin,
    /// One slice of an oversized file.
    Split(SplitPart),
}

/// One entry of an output unit: a byte range of a source file and the name it
/// gets under the target root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEntry {
    pub entry_name: String,
    pub relative_path: String,
    pub source: PathBuf,
    pub offset: u64,
    pub len: u64,
    pub modified: SystemTime,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputUnit {
    /// Unique name; archives are written as `{name}.zip`.
    pub name: String,
    pub bin: usize,
    /// Folder of the bin under the target root, e.g. `python2`.
    pub folder: String,
    pub kind: UnitKind,
    pub entries: Vec<UnitEntry>,
}

impl OutputUnit {
    pub fn total_len(&self) -> u64 {
        self.entries.iter().map(|e| e.len).sum()
    }
}

/// How far writing a unit into one sink got.
enum WriteState {
    Done,
    /// A source read failed inside a split unit; the unit must be discarded.
    SplitAborted,
    /// The sink itself failed; the unit is left as it is.
    Broken,
}

pub struct PartMaterializer {
    config: Arc<PackConfig>,
    splitter: FileSplitter,
    sinks: Vec<Arc<dyn ArchiveSink>>,
}

impl PartMaterializer {
    /// Materializer writing folders and/or archives as `config` asks.
    pub fn new(config: Arc<PackConfig>) -> Result<Self> {
        let mut sinks: Vec<Arc<dyn ArchiveSink>> = Vec::new();
        if config.write_folders {
            sinks.push(Arc::new(DirSink::new(&config.target_dir, config.buffer_size)));
        }
        if config.write_archives {
            sinks.push(Arc::new(ZipSink::new(&config)));
        }
        Self::with_sinks(config, sinks)
    }

    pub fn with_sinks(config: Arc<PackConfig>, sinks: Vec<Arc<dyn ArchiveSink>>) -> Result<Self> {
        let splitter = FileSplitter::new(config.max_part_size, config.buffer_size)?;
        Ok(Self {
            config,
            splitter,
            sinks,
        })
    }

    /// Output units for `bin`, in write order.
    pub fn plan(&self, bin: &Bin) -> Vec<OutputUnit> {
        let folder = self.config.bin_folder(bin.index());

        if let [file] = bin.files() {
            if self.splitter.needs_split(file) {
                return self
                    .splitter
                    .split(file)
                    .map(|part| {
                        let name = format!("{}.part{}", file.relative_path, part.index);
                        OutputUnit {
                            entries: vec![UnitEntry {
                                entry_name: format!("{folder}/{name}"),
                                relative_path: file.relative_path.clone(),
                                source: file.source.clone(),
                                offset: part.offset,
                                len: part.len,
                                modified: file.modified,
                                mode: file.mode,
                            }],
                            name,
                            bin: bin.index(),
                            folder: folder.clone(),
                            kind: UnitKind::Split(part),
                        }
                    })
                    .collect();
            }
        }

        let entries = bin
            .files()
            .iter()
            .map(|file| UnitEntry {
                entry_name: format!("{folder}/{}", file.relative_path),
                relative_path: file.relative_path.clone(),
                source: file.source.clone(),
                offset: 0,
                len: file.size,
                modified: file.modified,
                mode: file.mode,
            })
            .collect();

        vec![OutputUnit {
            name: self.config.bin_unit_name(bin.index()),
            bin: bin.index(),
            folder,
            kind: UnitKind::Bin,
            entries,
        }]
    }

    /// Write every unit of `bin`. Never fails as a whole: per-file and
    /// per-unit errors are returned in the outcome.
    pub async fn materialize(&self, bin: &Bin) -> BinOutcome {
        let mut outcome = BinOutcome::default();
        let units = self.plan(bin);

        let split_source = match (bin.files(), units.first().map(|u| &u.kind)) {
            ([file], Some(UnitKind::Split(_))) => match self.splitter.open(file) {
                Ok(source) => Some(source),
                Err(error) => {
                    warn!("skipping {}: {}", file.relative_path, error);
                    outcome.failures.push(Failure { unit: None, error });
                    return outcome;
                }
            },
            _ => None,
        };

        let mut failed: HashSet<String> = HashSet::new();
        for unit in &units {
            if split_source.is_some() && unit.entries.iter().any(|e| failed.contains(&e.relative_path)) {
                // The split of this file was aborted; later parts are not written.
                break;
            }
            let report = self
                .write_unit(unit, split_source.as_ref(), &mut failed, &mut outcome.failures)
                .await;
            outcome.units.push(report);
        }
        outcome
    }

    async fn write_unit(
        &self,
        unit: &OutputUnit,
        split_source: Option<&SplitSource>,
        failed: &mut HashSet<String>,
        failures: &mut Vec<Failure>,
    ) -> UnitReport {
        let failures_before = failures.len();
        let mut report = UnitReport::planned(unit);

        for sink in self.sinks.iter().filter(|s| s.accepts(unit)) {
            if unit.entries.iter().all(|e| failed.contains(&e.relative_path)) {
                break;
            }
            debug!("writing {} as {}", unit.name, sink.kind());
            let mut writer = match sink.open(unit).await {
                Ok(writer) => writer,
                Err(error) => {
                    record(failures, unit, error);
                    continue;
                }
            };

            let state = self
                .write_entries(writer.as_mut(), unit, split_source, failed, failures)
                .await;
            match state {
                WriteState::Done => match writer.close().await {
                    Ok(artifact) => report.artifacts.push(artifact),
                    Err(error) => record(failures, unit, error),
                },
                WriteState::SplitAborted => writer.abandon().await,
                WriteState::Broken => {}
            }
        }

        let written: Vec<_> = unit
            .entries
            .iter()
            .filter(|e| !failed.contains(&e.relative_path))
            .collect();
        report.entries = written.len();
        report.bytes = written.iter().map(|e| e.len).sum();
        report.complete = failures.len() == failures_before;

        if report.complete {
            info!(
                "wrote {} ({} entries, {})",
                unit.name,
                report.entries,
                crate::report::format_size(report.bytes)
            );
        } else {
            warn!("{} is incomplete", unit.name);
        }
        report
    }

    async fn write_entries(
        &self,
        writer: &mut dyn UnitWriter,
        unit: &OutputUnit,
        split_source: Option<&SplitSource>,
        failed: &mut HashSet<String>,
        failures: &mut Vec<Failure>,
    ) -> WriteState {
        for entry in &unit.entries {
            if failed.contains(&entry.relative_path) {
                continue;
            }
            let mut source = match (split_source, &unit.kind) {
                (Some(split), UnitKind::Split(part)) => split.part(part),
                _ => match RangeReader::open(&entry.source, entry.offset, entry.len) {
                    Ok(source) => source,
                    Err(error) => {
                        failed.insert(entry.relative_path.clone());
                        record(failures, unit, error);
                        continue;
                    }
                },
            };

            match writer
                .write_entry(&entry.entry_name, &mut source, entry.modified, entry.mode)
                .await
            {
                Ok(_) => {}
                Err(error @ PackError::Io { .. }) => {
                    failed.insert(entry.relative_path.clone());
                    record(failures, unit, error);
                    if matches!(unit.kind, UnitKind::Split(_)) {
                        return WriteState::SplitAborted;
                    }
                }
                Err(error) => {
                    record(failures, unit, error);
                    return WriteState::Broken;
                }
            }
        }
        WriteState::Done
    }
}

fn record(failures: &mut Vec<Failure>, unit: &OutputUnit, error: PackError) {
    warn!("{}: {}", unit.name, error);
    failures.push(Failure {
        unit: Some(unit.name.clone()),
        error,
    });
}
