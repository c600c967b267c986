#![allow(dead_code)]

use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use blem_collect::{
    BeamPath, BeamPathSelector, EngineError, EngineName, Matrix6, ModelEngine, ModelSnapshot,
    ModelType, Numeric,
};
use blem_config::{BeamPathPolicy, BlemConfig};
use tempfile::TempDir;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Initialize tracing once for integration tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(filter)
            .init();
    });
}

/// Default config with the run lock directory inside `dir`.
pub fn temp_config(dir: &TempDir) -> BlemConfig {
    let mut config = BlemConfig::default();
    config.global.lock_dir = dir.path().join("locks");
    config
}

pub fn selector(path: &str, model_type: ModelType) -> BeamPathSelector {
    BeamPathSelector::new(
        BeamPath::parse(path, BeamPathPolicy::Strict).unwrap(),
        model_type,
    )
}

/// Snapshot with K elements; `r{i}{j}` of element e is `e * 100 + i * 10 + j`
pub fn snapshot(names: &[&str]) -> ModelSnapshot {
    let k = names.len();
    let matrices: Vec<Matrix6> = (0..k)
        .map(|e| {
            let mut m = [[Numeric::Real(0.0); 6]; 6];
            for (i, row) in m.iter_mut().enumerate() {
                for (j, cell) in row.iter_mut().enumerate() {
                    *cell = Numeric::Real((e * 100 + (i + 1) * 10 + j + 1) as f64);
                }
            }
            m
        })
        .collect();
    let positions: Vec<f64> = (0..k).map(|i| i as f64 * 2.0).collect();
    ModelSnapshot {
        matrices,
        positions: vec![positions.clone(), positions],
        lengths: vec![vec![0.25; k]],
        twiss: (0..11)
            .map(|p| (0..k).map(|e| Numeric::Real((p * 10 + e) as f64)).collect())
            .collect(),
        energy: serde_json::json!(4.0),
        names: names.iter().map(|n| (*n).to_string()).collect(),
    }
}

/// Engine returning fixed data
pub struct FixtureEngine {
    pub snapshot: ModelSnapshot,
    pub elements: Vec<EngineName>,
    pub devices: Vec<EngineName>,
    pub reachable: bool,
    pub queries: AtomicUsize,
    pub quits: AtomicUsize,
}

impl FixtureEngine {
    pub fn new(snapshot: ModelSnapshot) -> Self {
        Self {
            snapshot,
            elements: Vec::new(),
            devices: Vec::new(),
            reachable: true,
            queries: AtomicUsize::new(0),
            quits: AtomicUsize::new(0),
        }
    }

    /// Index `element` to `device`
    pub fn with_device(mut self, element: &str, device: &str) -> Self {
        self.elements.push(EngineName::Name(element.to_string()));
        self.devices.push(EngineName::Name(device.to_string()));
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    fn check(&self) -> Result<(), EngineError> {
        if self.reachable {
            Ok(())
        } else {
            Err(EngineError::Unreachable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl ModelEngine for FixtureEngine {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn query_transport_model(
        &self,
        _selector: &BeamPathSelector,
    ) -> Result<ModelSnapshot, EngineError> {
        self.check()?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.clone())
    }

    async fn list_elements(
        &self,
        _pattern: &str,
        _convention: &str,
    ) -> Result<Vec<EngineName>, EngineError> {
        self.check()?;
        Ok(self.elements.clone())
    }

    async fn convert_names(&self, names: &[String]) -> Result<Vec<EngineName>, EngineError> {
        self.check()?;
        Ok(names
            .iter()
            .map(|n| {
                self.elements
                    .iter()
                    .position(|e| e.as_name() == Some(n.as_str()))
                    .map_or(EngineName::Other, |i| self.devices[i].clone())
            })
            .collect())
    }

    async fn quit(&self) -> Result<(), EngineError> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
