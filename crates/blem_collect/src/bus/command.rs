//! Bus access through `pvget`/`pvput`-style command lines
//!
//! `get_cmd` must print the PV as JSON on stdout. Scalars may be bare JSON
//! values or structures with a `value` member (normative types); tables are
//! the full structure. `put_cmd` receives the value as one shell-escaped
//! argument: JSON for tables, plain text for scalars.

use async_trait::async_trait;
use blem_config::BusConfig;
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

use super::{PvBus, ScalarValue, TableRecord};
use crate::BusError;
use crate::executor::{Executor, render_template, shell_escape};

/// Bus driven by external commands
pub struct CommandBus {
    config: BusConfig,
    executor: Executor,
    timeout: Duration,
}

impl CommandBus {
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let timeout = config.timeout();
        Self {
            config,
            executor: Executor::local(),
            timeout,
        }
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    async fn get_json(&self, pv: &str) -> Result<Value, BusError> {
        let cmd = render_template(&self.config.get_cmd, &[("pv", shell_escape(pv))]);
        let stdout = self.executor.run_timeout(&cmd, self.timeout).await?;
        if stdout.trim().is_empty() {
            return Err(BusError::NotFound(pv.to_string()));
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn put_raw(&self, pv: &str, value: &str) -> Result<(), BusError> {
        let cmd = render_template(
            &self.config.put_cmd,
            &[("pv", shell_escape(pv)), ("value", shell_escape(value))],
        );
        self.executor.run_timeout(&cmd, self.timeout).await?;
        Ok(())
    }
}

/// Decode a scalar, unwrapping a `value` member when present
fn decode_scalar(pv: &str, json: Value) -> Result<ScalarValue, BusError> {
    let inner = match json {
        Value::Object(mut fields) if fields.contains_key("value") => {
            fields.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(inner.clone())
        .map_err(|_| BusError::Codec(format!("{pv} holds unsupported value {inner}")))
}

#[async_trait]
impl PvBus for CommandBus {
    #[instrument(skip(self))]
    async fn get_table(&self, pv: &str) -> Result<TableRecord, BusError> {
        let json = self.get_json(pv).await?;
        TableRecord::from_json(json)
    }

    #[instrument(skip(self, record))]
    async fn put_table(&self, pv: &str, record: &TableRecord) -> Result<(), BusError> {
        let json = serde_json::to_string(&record.to_json())?;
        self.put_raw(pv, &json).await
    }

    async fn get_scalar(&self, pv: &str) -> Result<ScalarValue, BusError> {
        let json = self.get_json(pv).await?;
        decode_scalar(pv, json)
    }

    async fn put_scalar(&self, pv: &str, value: ScalarValue) -> Result<(), BusError> {
        self.put_raw(pv, &value.to_put_arg()).await
    }
}
