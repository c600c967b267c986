//! Beam path and model type selection
//!
//! A [`BeamPathSelector`] names which model snapshot is fetched and which PV
//! namespace it is written to. It is fixed for the life of the process.

use blem_config::BeamPathPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Accelerator destinations with a published model
pub const KNOWN_BEAM_PATHS: [&str; 6] = ["CU_HXR", "CU_SXR", "SC_HXR", "SC_SXR", "SC_DIAG0", "SC_BSYD"];

/// Selector parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Unknown beam path '{0}'. Must be one of: {known}", known = KNOWN_BEAM_PATHS.join(", "))]
    UnknownBeamPath(String),

    #[error("Invalid beam path '{0}': must be a single token without ':'")]
    InvalidBeamPath(String),

    #[error("Unknown model type '{0}'. Must be one of: LIVE, DESIGN")]
    UnknownModelType(String),
}

/// A named accelerator sector/route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeamPath(String);

impl BeamPath {
    /// Parse a beam path under the given validation policy
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError`] when the value is rejected by the policy.
    pub fn parse(value: &str, policy: BeamPathPolicy) -> Result<Self, SelectorError> {
        if value.is_empty() || value.contains(':') || value.chars().any(char::is_whitespace) {
            return Err(SelectorError::InvalidBeamPath(value.to_string()));
        }
        if policy == BeamPathPolicy::Strict && !KNOWN_BEAM_PATHS.contains(&value) {
            return Err(SelectorError::UnknownBeamPath(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Copper linac paths report their rate as an enumeration
    pub fn is_copper(&self) -> bool {
        self.0.starts_with("CU")
    }
}

impl fmt::Display for BeamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which flavor of the model to publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelType {
    /// Currently installed configuration
    Live,
    /// Nominal design configuration
    Design,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Design => "DESIGN",
        }
    }

    /// Engine query flavor for this model type
    pub fn query_type(&self) -> QueryType {
        match self {
            Self::Live => QueryType::Extant,
            Self::Design => QueryType::Design,
        }
    }
}

impl FromStr for ModelType {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIVE" => Ok(Self::Live),
            "DESIGN" => Ok(Self::Design),
            other => Err(SelectorError::UnknownModelType(other.to_string())),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-side query flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Extant,
    Design,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extant => "EXTANT",
            Self::Design => "DESIGN",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Beam path plus model type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeamPathSelector {
    pub beam_path: BeamPath,
    pub model_type: ModelType,
}

impl BeamPathSelector {
    pub fn new(beam_path: BeamPath, model_type: ModelType) -> Self {
        Self {
            beam_path,
            model_type,
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.model_type.query_type()
    }

    /// PV namespace: `<prefix>:<beamPath>:<modelType>`
    pub fn namespace(&self, prefix: &str) -> String {
        format!("{prefix}:{}:{}", self.beam_path, self.model_type)
    }

    /// Filter arguments passed to the engine's transport model query
    pub fn filters(&self) -> Vec<String> {
        vec![
            format!("BEAMPATH={}", self.beam_path),
            format!("TYPE={}", self.query_type()),
        ]
    }
}

impl fmt::Display for BeamPathSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.beam_path, self.model_type)
    }
}
