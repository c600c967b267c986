//! `blem_config` - Configuration parsing and validation for the beamline model service
//!
//! This crate provides:
//! - TOML configuration parsing
//! - Default value handling
//! - Environment variable overrides
//! - Path expansion (`~/` to home directory)
//! - Auto-discovery from standard config paths

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlemConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// Sync cadence
    pub cadence: CadenceConfig,

    /// Model engine commands
    pub engine: EngineConfig,

    /// PV bus commands
    pub bus: BusConfig,

    /// Beam path handling
    pub beam: BeamConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Prefix of every PV this service writes
    pub pv_prefix: String,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logs: bool,

    /// Directory holding the per-namespace run lock
    pub lock_dir: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pv_prefix: DEFAULT_PV_PREFIX.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            lock_dir: default_lock_dir(),
        }
    }
}

/// Default PV prefix
pub const DEFAULT_PV_PREFIX: &str = "BLEM:SYS0:1";

/// Default lock directory using XDG directories
fn default_lock_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blem")
}

/// Expand tilde in path to home directory
#[must_use]
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" && let Some(home) = dirs::home_dir() {
        return home;
    }
    path.to_path_buf()
}

impl GlobalConfig {
    pub fn expand_paths(&mut self) {
        self.lock_dir = expand_path(&self.lock_dir);
    }
}

/// Cycle pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Minimum time between cycle starts in milliseconds
    pub period_ms: u64,
}

/// Shortest period allowed; cycles never run faster than 1 Hz
pub const MIN_PERIOD_MS: u64 = 1000;

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            period_ms: MIN_PERIOD_MS,
        }
    }
}

/// Model engine command templates
///
/// Placeholders are substituted shell-escaped: `{beam_path}`, `{filters}`,
/// `{pattern}`, `{convention}` and `{names}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Returns the transport model snapshot as JSON
    pub query_cmd: String,

    /// Lists every element name known to the model
    pub list_cmd: String,

    /// Converts element names to device names
    pub convert_cmd: String,

    /// Run once when the service stops
    pub quit_cmd: Option<String>,

    /// Wildcard passed to `list_cmd`
    pub element_pattern: String,

    /// Naming convention passed to `list_cmd`
    pub naming_convention: String,

    /// Engine call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_cmd: "model-export rmat {beam_path} {filters}".to_string(),
            list_cmd: "model-export names {pattern} {convention}".to_string(),
            convert_cmd: "model-export convert {names}".to_string(),
            quit_cmd: None,
            element_pattern: "*".to_string(),
            naming_convention: "MAD".to_string(),
            timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    /// Per-command timeout as Duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// PV bus command templates
///
/// `{pv}` is the record name, `{value}` the JSON-encoded value to write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Prints the current record as JSON
    pub get_cmd: String,

    /// Writes a JSON value to a record
    pub put_cmd: String,

    /// Bus call timeout in seconds
    pub timeout_secs: u64,

    /// Display width of the status PV
    pub status_width: usize,

    /// Maintain the `_CNT` and `ERR_CNT` counters
    pub track_counters: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            get_cmd: "pvget -M json {pv}".to_string(),
            put_cmd: "pvput {pv} {value}".to_string(),
            timeout_secs: 5,
            status_width: 40,
            track_counters: true,
        }
    }
}

impl BusConfig {
    /// Per-operation timeout as Duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How strictly the beam path argument is validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BeamPathPolicy {
    /// Only the known accelerator destinations
    #[default]
    Strict,
    /// Any single token
    Permissive,
}

impl BeamPathPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "permissive" => Some(Self::Permissive),
            _ => None,
        }
    }
}

/// Beam path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    /// Beam path validation policy
    pub path_policy: BeamPathPolicy,

    /// Refuse to start when the destination rate PV reports no beam
    pub require_rate: bool,

    /// Rate PV per beam path
    pub rate_pvs: HashMap<String, String>,
}

impl Default for BeamConfig {
    fn default() -> Self {
        let rate_pvs = [
            ("CU_HXR", "IOC:BSY0:MP01:BYKIK_RATE"),
            ("CU_SXR", "IOC:BSY0:MP01:BYKIKS_RATE"),
            ("SC_DIAG0", "TPG:SYS0:1:DST01:RATE"),
            ("SC_BSYD", "TPG:SYS0:1:DST02:RATE"),
            ("SC_HXR", "TPG:SYS0:1:DST03:RATE"),
            ("SC_SXR", "TPG:SYS0:1:DST04:RATE"),
        ]
        .into_iter()
        .map(|(path, pv)| (path.to_string(), pv.to_string()))
        .collect();

        Self {
            path_policy: BeamPathPolicy::Strict,
            require_rate: false,
            rate_pvs,
        }
    }
}

impl BlemConfig {
    /// Standard config file paths, in order of precedence
    #[must_use]
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("blem.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("blem").join("blem.toml"));
        }

        paths.push(PathBuf::from("/etc/blem/blem.toml"));

        paths
    }

    /// Discover and load configuration from standard paths.
    ///
    /// Returns defaults if no config file is found.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a discovered config file cannot be loaded.
    pub fn discover() -> Result<Self, ConfigError> {
        for path in Self::config_paths() {
            if path.exists() {
                info!(path = %path.display(), "Loading config from");
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Discover config and apply environment variable overrides.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if config discovery or validation fails.
    pub fn discover_with_env() -> Result<Self, ConfigError> {
        let mut config = Self::discover()?;
        config.apply_env_overrides();
        config.global.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: BlemConfig = toml::from_str(&content)?;
        config.global.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.global.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BLEM_PV_PREFIX") {
            self.global.pv_prefix = val;
        }
        if let Ok(val) = std::env::var("BLEM_LOG_LEVEL") {
            self.global.log_level = val;
        }
        if let Ok(val) = std::env::var("BLEM_LOCK_DIR") {
            self.global.lock_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("BLEM_PERIOD_MS")
            && let Ok(ms) = val.parse()
        {
            self.cadence.period_ms = ms;
        }
        if let Ok(val) = std::env::var("BLEM_PATH_POLICY")
            && let Some(policy) = BeamPathPolicy::parse(&val)
        {
            self.beam.path_policy = policy;
        }
    }

    /// Validate configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when validation rules are violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.global.pv_prefix;
        if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "pv_prefix '{prefix}' must be non-empty and contain no whitespace"
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.global.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.global.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.cadence.period_ms < MIN_PERIOD_MS {
            return Err(ConfigError::ValidationError(format!(
                "cadence.period_ms must be >= {MIN_PERIOD_MS}"
            )));
        }

        if self.engine.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine.timeout_secs must be > 0".to_string(),
            ));
        }

        if self.bus.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "bus.timeout_secs must be > 0".to_string(),
            ));
        }

        // Room for at least one character plus the "..." marker
        if self.bus.status_width < 8 {
            return Err(ConfigError::ValidationError(
                "bus.status_width must be >= 8".to_string(),
            ));
        }

        if !self.bus.get_cmd.contains("{pv}") {
            return Err(ConfigError::ValidationError(
                "bus.get_cmd must contain {pv}".to_string(),
            ));
        }
        if !self.bus.put_cmd.contains("{pv}") || !self.bus.put_cmd.contains("{value}") {
            return Err(ConfigError::ValidationError(
                "bus.put_cmd must contain {pv} and {value}".to_string(),
            ));
        }

        for (name, cmd) in [
            ("engine.query_cmd", &self.engine.query_cmd),
            ("engine.list_cmd", &self.engine.list_cmd),
            ("engine.convert_cmd", &self.engine.convert_cmd),
        ] {
            if cmd.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must not be empty"
                )));
            }
        }

        Ok(())
    }

    /// Get cycle period as Duration
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.cadence.period_ms)
    }

    /// Rate PV for a beam path, if one is configured
    #[must_use]
    pub fn rate_pv(&self, beam_path: &str) -> Option<&str> {
        self.beam.rate_pvs.get(beam_path).map(String::as_str)
    }
}
