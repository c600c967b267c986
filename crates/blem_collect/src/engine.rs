//! Model engine adapter
//!
//! The numerical model engine is an external collaborator. [`ModelEngine`]
//! is the seam the sync cycle talks to; [`CommandEngine`] drives the engine
//! through configured command lines that print JSON on stdout.
//!
//! ## Expected output shapes
//! - `query_cmd`: a [`ModelSnapshot`] object
//! - `list_cmd`, `convert_cmd`: a JSON array, possibly holding non-strings

use async_trait::async_trait;
use blem_config::EngineConfig;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::executor::{Executor, render_template, shell_escape};
use crate::selector::BeamPathSelector;
use crate::value::{EngineName, ModelSnapshot};
use crate::EngineError;

/// The model engine capabilities the service consumes
#[async_trait]
pub trait ModelEngine: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// Fetch matrices, positions, lengths, Twiss and names for every element
    async fn query_transport_model(
        &self,
        selector: &BeamPathSelector,
    ) -> Result<ModelSnapshot, EngineError>;

    /// All element names matching a wildcard pattern
    async fn list_elements(
        &self,
        pattern: &str,
        convention: &str,
    ) -> Result<Vec<EngineName>, EngineError>;

    /// Device names for the given element names, positionally aligned
    async fn convert_names(&self, names: &[String]) -> Result<Vec<EngineName>, EngineError>;

    /// Release the engine
    async fn quit(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Engine driven by external commands
pub struct CommandEngine {
    config: EngineConfig,
    executor: Executor,
    timeout: Duration,
}

impl CommandEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let timeout = config.timeout();
        Self {
            config,
            executor: Executor::local(),
            timeout,
        }
    }

    /// Use a custom executor
    #[must_use]
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    async fn run_json<T: serde::de::DeserializeOwned>(&self, cmd: &str) -> Result<T, EngineError> {
        let stdout = self.executor.run_timeout(cmd, self.timeout).await?;
        if stdout.trim().is_empty() {
            return Err(EngineError::ParseError("empty output".to_string()));
        }
        serde_json::from_str(&stdout).map_err(|e| EngineError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl ModelEngine for CommandEngine {
    fn name(&self) -> &'static str {
        "command"
    }

    #[instrument(skip(self, selector), fields(selector = %selector))]
    async fn query_transport_model(
        &self,
        selector: &BeamPathSelector,
    ) -> Result<ModelSnapshot, EngineError> {
        let filters: Vec<String> = selector.filters().iter().map(|f| shell_escape(f)).collect();
        let cmd = render_template(
            &self.config.query_cmd,
            &[
                ("beam_path", shell_escape(selector.beam_path.as_str())),
                ("filters", filters.join(" ")),
            ],
        );
        let snapshot: ModelSnapshot = self.run_json(&cmd).await?;
        debug!(elements = snapshot.element_count(), "Transport model received");
        Ok(snapshot)
    }

    #[instrument(skip(self))]
    async fn list_elements(
        &self,
        pattern: &str,
        convention: &str,
    ) -> Result<Vec<EngineName>, EngineError> {
        let cmd = render_template(
            &self.config.list_cmd,
            &[
                ("pattern", shell_escape(pattern)),
                ("convention", shell_escape(convention)),
            ],
        );
        self.run_json(&cmd).await
    }

    #[instrument(skip(self, names), fields(count = names.len()))]
    async fn convert_names(&self, names: &[String]) -> Result<Vec<EngineName>, EngineError> {
        let escaped: Vec<String> = names.iter().map(|n| shell_escape(n)).collect();
        let cmd = render_template(&self.config.convert_cmd, &[("names", escaped.join(" "))]);
        self.run_json(&cmd).await
    }

    async fn quit(&self) -> Result<(), EngineError> {
        let Some(cmd) = &self.config.quit_cmd else {
            return Ok(());
        };
        let output = self.executor.run(cmd, self.timeout).await?;
        if !output.success() {
            warn!(exit_code = output.exit_code, "Engine quit command failed");
        }
        Ok(())
    }
}
