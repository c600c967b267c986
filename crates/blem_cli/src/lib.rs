//! blem_cli - Command line entry for the beamline model service
//!
//! This crate provides:
//! - The clap command definition
//! - Startup: config, selector, run lock, engine and bus adapters
//! - The serve loop: beam gate, element index, cadence scheduler, shutdown

use blem_collect::gate::beam_is_running;
use blem_collect::{
    BeamPath, BeamPathSelector, CadenceScheduler, CommandBus, CommandEngine, ElementDeviceIndex,
    EngineError, LockError, ModelEngine, ModelType, PvBus, RunLock, SchedulerSummary,
    SelectorError, StatusWriter, SyncCycle, SyncOptions,
};
use blem_config::{BlemConfig, ConfigError};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// CLI errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Invalid selector: {0}")]
    SelectorError(#[from] SelectorError),

    #[error("Run lock: {0}")]
    LockError(#[from] LockError),

    #[error("Engine startup failed: {0}")]
    EngineError(#[from] EngineError),
}

/// Main CLI application
#[derive(Parser, Debug)]
#[command(name = "blem")]
#[command(
    author,
    version,
    about = "Publishes accelerator transport model tables (RMAT, TWISS) to the PV bus"
)]
pub struct Cli {
    /// Beam path to publish, e.g. SC_SXR
    pub beam_path: String,

    /// Model type: LIVE or DESIGN
    pub model_type: ModelType,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}

/// How a serve run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The beam gate found no beam; nothing was published
    BeamOff,
    /// The scheduler ran and stopped
    Stopped(SchedulerSummary),
}

impl Cli {
    /// Load the config file given on the command line, or discover one.
    ///
    /// # Errors
    /// Returns [`CliError::ConfigError`] if loading or validation fails.
    pub fn load_config(&self) -> Result<BlemConfig, CliError> {
        let config = match &self.config {
            Some(path) => BlemConfig::load_with_env(path)?,
            None => BlemConfig::discover_with_env()?,
        };
        Ok(config)
    }

    /// Resolve the selector under the configured beam path policy
    ///
    /// # Errors
    /// Returns [`CliError::SelectorError`] for a rejected beam path.
    pub fn selector(&self, config: &BlemConfig) -> Result<BeamPathSelector, CliError> {
        let beam_path = BeamPath::parse(&self.beam_path, config.beam.path_policy)?;
        Ok(BeamPathSelector::new(beam_path, self.model_type))
    }

    /// Run the service until Ctrl-C, or for one cycle with `--once`.
    ///
    /// # Errors
    /// Returns a [`CliError`] when startup fails. Cycle failures are not errors.
    pub async fn run(self, config: BlemConfig) -> Result<ServeOutcome, CliError> {
        let selector = self.selector(&config)?;
        let namespace = selector.namespace(&config.global.pv_prefix);
        info!(
            beam_path = %selector.beam_path,
            model_type = %selector.model_type,
            namespace = %namespace,
            "Starting"
        );

        let _lock = RunLock::acquire(&config.global.lock_dir, &namespace)?;
        let bus: Arc<dyn PvBus> = Arc::new(CommandBus::new(config.bus.clone()));
        let engine: Arc<dyn ModelEngine> = Arc::new(CommandEngine::new(config.engine.clone()));

        serve(&config, selector, engine, bus, self.once, shutdown_signal()).await
    }
}

/// Beam gate, element index, then the scheduler.
///
/// The bus is closed exactly once on every path out.
///
/// # Errors
/// Returns [`CliError::EngineError`] when the element index cannot be built.
pub async fn serve<F>(
    config: &BlemConfig,
    selector: BeamPathSelector,
    engine: Arc<dyn ModelEngine>,
    bus: Arc<dyn PvBus>,
    once: bool,
    shutdown: F,
) -> Result<ServeOutcome, CliError>
where
    F: Future<Output = ()> + Send,
{
    let options = SyncOptions::from(&config.bus);
    let namespace = selector.namespace(&config.global.pv_prefix);
    let status = StatusWriter::new(bus.clone(), &namespace, options.status_width);

    if config.beam.require_rate {
        match config.rate_pv(selector.beam_path.as_str()) {
            Some(rate_pv) => {
                if !beam_is_running(bus.as_ref(), &selector.beam_path, rate_pv).await {
                    status
                        .info(&format!("No beam to {}", selector.beam_path))
                        .await;
                    bus.close().await;
                    quit_engine(engine.as_ref()).await;
                    return Ok(ServeOutcome::BeamOff);
                }
            }
            None => warn!(beam_path = %selector.beam_path, "No rate PV configured, skipping beam check"),
        }
    }

    let index = match ElementDeviceIndex::build(
        engine.as_ref(),
        &config.engine.element_pattern,
        &config.engine.naming_convention,
    )
    .await
    {
        Ok(index) => index,
        Err(e) => {
            error!(error = %e, "Element index build failed");
            status.error(&format!("Startup failed: {e}")).await;
            bus.close().await;
            quit_engine(engine.as_ref()).await;
            return Err(e.into());
        }
    };

    let scheduler = if once {
        CadenceScheduler::once(config.period())
    } else {
        CadenceScheduler::new(config.period())
    };
    let mut cycle = SyncCycle::new(
        selector,
        &config.global.pv_prefix,
        engine.clone(),
        bus,
        Arc::new(index),
        options,
    );
    let summary = scheduler.run(&mut cycle, shutdown).await;
    quit_engine(engine.as_ref()).await;

    Ok(ServeOutcome::Stopped(summary))
}

async fn quit_engine(engine: &dyn ModelEngine) {
    if let Err(e) = engine.quit().await {
        warn!(error = %e, "Engine did not quit cleanly");
    }
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
