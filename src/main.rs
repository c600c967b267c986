//! Beamline model service
//!
//! This is the main entry point for the `blem` binary.

use anyhow::Result;
use blem_cli::{Cli, ServeOutcome};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // RUST_LOG wins over the config file; --verbose wins over both
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.global.log_level.to_lowercase()))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.global.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match cli.run(config).await? {
        ServeOutcome::BeamOff => tracing::info!("No beam, exiting"),
        ServeOutcome::Stopped(summary) => tracing::info!(
            cycles = summary.cycles,
            clean_cycles = summary.clean_cycles,
            "Stopped"
        ),
    }

    Ok(())
}
