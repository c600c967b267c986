//! blem_collect - Model sampling and PV publishing for the beamline model service
//!
//! This crate provides:
//! - The `ModelEngine` trait and a command-backed engine adapter
//! - The `PvBus` trait with command-backed and in-memory buses
//! - Element/device index construction
//! - Projection of model arrays into RMAT and TWISS table payloads
//! - The per-cycle sync logic and the cadence scheduler that drives it
//!
//! # Publishing Principles
//!
//! 1. **Read-modify-write**: Table records are fetched, their columns replaced, and written back whole
//! 2. **Per-table isolation**: An RMAT failure never prevents a TWISS attempt in the same cycle
//! 3. **Freshness on success only**: `_TOD` and `_CNT` move only after a table is published
//! 4. **Fail-soft**: A bad cycle is reported on the status PV; the next cycle is the retry
//! 5. **Bounded rate**: Cycles never start more often than once per period

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod bus;
pub mod engine;
pub mod executor;
pub mod gate;
pub mod index;
pub mod lock;
pub mod projector;
pub mod scheduler;
pub mod selector;
pub mod status;
pub mod sync;
pub mod value;

#[cfg(test)]
mod test_support;

pub use bus::{CommandBus, MemoryBus, PvBus, ScalarValue, TableRecord};
pub use engine::{CommandEngine, ModelEngine};
pub use index::ElementDeviceIndex;
pub use lock::{LockError, RunLock};
pub use projector::{Column, ProjectionInput, TWISS_KEYS, TableKind, TablePayload, project};
pub use scheduler::{CadenceScheduler, CycleRunner, SchedulerSummary};
pub use selector::{BeamPath, BeamPathSelector, ModelType, QueryType, SelectorError};
pub use status::StatusWriter;
pub use sync::{CycleReport, SyncCycle, SyncOptions, TableOutcome};
pub use value::{EngineName, Matrix6, ModelSnapshot, Numeric};

/// Model engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Model engine unreachable: {0}")]
    Unreachable(String),

    #[error("Engine command failed: {0}")]
    ExecutionError(String),

    #[error("Failed to parse engine output: {0}")]
    ParseError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// PV bus errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("PV not found: {0}")]
    NotFound(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected value: {0}")]
    Codec(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Classification of a per-table failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Projector called with both or neither of matrix/Twiss, or ragged columns
    InvalidArgument,
    /// Model produced values the table column type cannot hold
    DataType,
    /// Engine or bus call did not complete
    Transport,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::DataType => "data_type",
            Self::Transport => "transport",
        }
    }
}

/// Failure of one table's fetch-project-publish sequence
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("data type: {0}")]
    DataType(String),

    #[error("transport: {0}")]
    Transport(String),
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidArgument(_) => FailureKind::InvalidArgument,
            Self::DataType(_) => FailureKind::DataType,
            Self::Transport(_) => FailureKind::Transport,
        }
    }
}

impl From<BusError> for SyncError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Transport(msg) => Self::Transport(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<EngineError> for SyncError {
    fn from(err: EngineError) -> Self {
        Self::Transport(err.to_string())
    }
}
