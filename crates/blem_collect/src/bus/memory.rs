//! In-process PV bus
//!
//! Holds records in concurrent maps. Only PVs that were seeded exist, so a
//! typo in a PV name shows up as [`BusError::NotFound`] just as on a real
//! bus. Failures can be injected per PV.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::{PvBus, ScalarValue, TableRecord};
use crate::BusError;

/// Table and scalar suffixes the service writes under its namespace
const TABLE_SUFFIXES: [&str; 2] = ["RMAT", "TWISS"];
const COUNTER_SUFFIXES: [&str; 3] = ["RMAT_CNT", "TWISS_CNT", "ERR_CNT"];
const TEXT_SUFFIXES: [&str; 3] = ["RMAT_TOD", "TWISS_TOD", "STAT"];

/// Dashmap-backed bus
#[derive(Debug, Default)]
pub struct MemoryBus {
    tables: DashMap<String, TableRecord>,
    scalars: DashMap<String, ScalarValue>,
    /// Every scalar value written, per PV, oldest first
    history: DashMap<String, Vec<ScalarValue>>,
    table_puts: DashMap<String, usize>,
    failures: DashMap<String, String>,
    closed: AtomicUsize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus holding every PV the service uses under `namespace`
    pub fn for_namespace(namespace: &str) -> Self {
        let bus = Self::new();
        for suffix in TABLE_SUFFIXES {
            bus.insert_table(&format!("{namespace}:{suffix}"), TableRecord::empty());
        }
        for suffix in COUNTER_SUFFIXES {
            bus.insert_scalar(&format!("{namespace}:{suffix}"), ScalarValue::Int(0));
        }
        for suffix in TEXT_SUFFIXES {
            bus.insert_scalar(&format!("{namespace}:{suffix}"), ScalarValue::Text(String::new()));
        }
        bus
    }

    pub fn insert_table(&self, pv: &str, record: TableRecord) {
        self.tables.insert(pv.to_string(), record);
    }

    pub fn insert_scalar(&self, pv: &str, value: ScalarValue) {
        self.scalars.insert(pv.to_string(), value);
    }

    /// Make every get and put on `pv` fail with a transport error
    pub fn fail_on(&self, pv: &str, reason: &str) {
        self.failures.insert(pv.to_string(), reason.to_string());
    }

    pub fn clear_failure(&self, pv: &str) {
        self.failures.remove(pv);
    }

    pub fn table(&self, pv: &str) -> Option<TableRecord> {
        self.tables.get(pv).map(|r| r.value().clone())
    }

    pub fn scalar(&self, pv: &str) -> Option<ScalarValue> {
        self.scalars.get(pv).map(|v| v.value().clone())
    }

    /// Scalar values written to `pv`, oldest first
    pub fn history(&self, pv: &str) -> Vec<ScalarValue> {
        self.history
            .get(pv)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    /// Number of successful table writes to `pv`
    pub fn table_puts(&self, pv: &str) -> usize {
        self.table_puts.get(pv).map_or(0, |n| *n)
    }

    /// How many times [`PvBus::close`] was called
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self, pv: &str) -> Result<(), BusError> {
        match self.failures.get(pv) {
            Some(reason) => Err(BusError::Transport(reason.value().clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PvBus for MemoryBus {
    async fn get_table(&self, pv: &str) -> Result<TableRecord, BusError> {
        self.check(pv)?;
        self.table(pv)
            .ok_or_else(|| BusError::NotFound(pv.to_string()))
    }

    async fn put_table(&self, pv: &str, record: &TableRecord) -> Result<(), BusError> {
        self.check(pv)?;
        let mut slot = self
            .tables
            .get_mut(pv)
            .ok_or_else(|| BusError::NotFound(pv.to_string()))?;
        *slot = record.clone();
        drop(slot);
        *self.table_puts.entry(pv.to_string()).or_insert(0) += 1;
        debug!(pv = %pv, "Table written");
        Ok(())
    }

    async fn get_scalar(&self, pv: &str) -> Result<ScalarValue, BusError> {
        self.check(pv)?;
        self.scalar(pv)
            .ok_or_else(|| BusError::NotFound(pv.to_string()))
    }

    async fn put_scalar(&self, pv: &str, value: ScalarValue) -> Result<(), BusError> {
        self.check(pv)?;
        let mut slot = self
            .scalars
            .get_mut(pv)
            .ok_or_else(|| BusError::NotFound(pv.to_string()))?;
        *slot = value.clone();
        drop(slot);
        self.history.entry(pv.to_string()).or_default().push(value);
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
