//! PV bus adapter
//!
//! The bus is an external collaborator. [`PvBus`] covers the operations the
//! service needs: whole-record get/put for the two tables and scalar get/put
//! for timestamps, counters and the status string.
//!
//! Two implementations ship with the crate:
//! - [`CommandBus`]: drives `pvget`/`pvput`-style command lines
//! - [`MemoryBus`]: in-process bus for tests and dry runs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BusError;

mod command;
mod memory;
mod record;

pub use command::CommandBus;
pub use memory::MemoryBus;
pub use record::TableRecord;

/// A scalar PV value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Text(String),
    /// Enumerated PV: selected index plus the choice labels
    Enum { index: usize, choices: Vec<String> },
}

impl ScalarValue {
    /// Integer view; floats with no fractional part are accepted
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Enum { index, .. } => i64::try_from(*index).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Label of the selected enum choice
    pub fn enum_label(&self) -> Option<&str> {
        match self {
            Self::Enum { index, choices } => choices.get(*index).map(String::as_str),
            _ => None,
        }
    }

    /// Render as the argument handed to a put command
    pub fn to_put_arg(&self) -> String {
        match self {
            Self::Enum { index, .. } => index.to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Enum { index, choices } => match choices.get(*index) {
                Some(label) => f.write_str(label),
                None => write!(f, "{index}"),
            },
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Process-variable bus operations
#[async_trait]
pub trait PvBus: Send + Sync {
    /// Fetch the full structured record
    async fn get_table(&self, pv: &str) -> Result<TableRecord, BusError>;

    /// Publish a full structured record
    async fn put_table(&self, pv: &str, record: &TableRecord) -> Result<(), BusError>;

    async fn get_scalar(&self, pv: &str) -> Result<ScalarValue, BusError>;

    async fn put_scalar(&self, pv: &str, value: ScalarValue) -> Result<(), BusError>;

    /// Read an integer PV, add one, write it back. Returns the new value.
    async fn increment(&self, pv: &str) -> Result<i64, BusError> {
        let current = self.get_scalar(pv).await?;
        let current = current
            .as_i64()
            .ok_or_else(|| BusError::Codec(format!("{pv} is not an integer: {current}")))?;
        let next = current.saturating_add(1);
        self.put_scalar(pv, ScalarValue::Int(next)).await?;
        Ok(next)
    }

    /// Release the connection
    async fn close(&self) {}
}
