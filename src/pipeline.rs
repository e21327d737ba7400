//! One complete run: catalog, pack, plan, materialize.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::catalog::FileCatalog;
use crate::config::{PackConfig, PackOptions};
use crate::error::{PackError, Result};
use crate::materialize::PartMaterializer;
use crate::packer::{Bin, BinPacker};
use crate::report::{format_size, BinOutcome, Failure, PackReport, UnitReport};

/// Run a pack with the given options.
///
/// Returns `Err` only for fatal problems (invalid configuration, missing or
/// non-directory source, unusable target). Everything else is recorded in the
/// returned [`PackReport`].
pub async fn run(options: PackOptions) -> Result<PackReport> {
    let config = Arc::new(options.build()?);
    run_with_config(config).await
}

/// Run a pack with an already built configuration.
///
/// Sizes are checked again before the source is touched, since the fields of
/// a [`PackConfig`] can be changed after [`PackOptions::build`].
pub async fn run_with_config(config: Arc<PackConfig>) -> Result<PackReport> {
    if config.max_part_size == 0 {
        return Err(PackError::InvalidCapacity(0));
    }
    if config.buffer_size == 0 {
        return Err(PackError::InvalidBufferSize(0));
    }

    let catalog = FileCatalog::open(&config.source_dir, Some(config.target_dir.as_path()))?;
    info!("Processing directory: {}", catalog.root().display());

    let mut report = PackReport {
        dry_run: config.dry_run,
        ..Default::default()
    };
    let mut packer = BinPacker::new(config.max_part_size)?;
    let mut bins = Vec::new();
    for item in catalog {
        match item {
            Ok(file) => {
                debug!("found {} ({} bytes)", file.relative_path, file.size);
                report.files_found += 1;
                report.bytes_found += file.size;
                bins.extend(packer.push(file));
            }
            Err(error) => {
                warn!("skipping: {}", error);
                report.failures.push(Failure { unit: None, error });
            }
        }
    }
    bins.extend(packer.finish());
    report.bins = bins.len();

    if report.files_found == 0 {
        info!("No files found, nothing to do");
        return Ok(report);
    }
    info!(
        "Found {} file(s), {}; splitting into {} part(s) of up to {} each",
        report.files_found,
        format_size(report.bytes_found),
        bins.len(),
        format_size(config.max_part_size)
    );

    let materializer = Arc::new(PartMaterializer::new(config.clone())?);

    if config.dry_run {
        for bin in &bins {
            for unit in materializer.plan(bin) {
                info!("would write {} ({} entries)", unit.name, unit.entries.len());
                for entry in &unit.entries {
                    debug!("  {} <- {}", entry.entry_name, entry.source.display());
                }
                report.units.push(UnitReport::planned(&unit));
            }
        }
        return Ok(report);
    }

    tokio::fs::create_dir_all(&config.target_dir)
        .await
        .map_err(|e| PackError::io(&config.target_dir, None, e))?;

    for outcome in materialize_all(materializer, bins, config.jobs).await {
        report.absorb(outcome);
    }

    info!(
        "Done: {} unit(s) written, {} failure(s)",
        report.units.len(),
        report.failures.len()
    );
    Ok(report)
}

/// Materialize sealed bins, up to `jobs` at a time, returning outcomes in bin order.
async fn materialize_all(
    materializer: Arc<PartMaterializer>,
    bins: Vec<Bin>,
    jobs: usize,
) -> Vec<BinOutcome> {
    if jobs <= 1 {
        let mut outcomes = Vec::with_capacity(bins.len());
        for bin in &bins {
            outcomes.push(materializer.materialize(bin).await);
        }
        return outcomes;
    }

    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut tasks = JoinSet::new();
    for bin in bins {
        let materializer = materializer.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (bin.index(), materializer.materialize(&bin).await)
        });
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => warn!("materialization task cancelled: {}", e),
        }
    }
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}
