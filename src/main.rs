//! Main entry point for the layersplit CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use layersplit::{Cli, PackReport};

/// Application entry point.
///
/// Exits with status 1 when the run could not start (bad options, missing
/// source directory, unwritable target). Files skipped along the way are
/// listed in the summary but do not change the exit status.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match pack(&cli).await {
        Ok(report) => {
            print!("{report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("layersplit: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn pack(cli: &Cli) -> Result<PackReport> {
    tracing::debug!("options: {:?}", cli);
    layersplit::run(cli.to_options())
        .await
        .with_context(|| format!("cannot split '{}'", cli.source_dir.display()))
}

/// Log to stderr; `RUST_LOG` takes precedence over `-v`/`-q`.
fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
