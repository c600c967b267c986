//! Shared fixtures for unit tests

use async_trait::async_trait;
use mockall::mock;

use crate::EngineError;
use crate::engine::ModelEngine;
use crate::selector::BeamPathSelector;
use crate::value::{EngineName, Matrix6, ModelSnapshot, Numeric};

mock! {
    pub Engine {}

    #[async_trait]
    impl ModelEngine for Engine {
        fn name(&self) -> &'static str;
        async fn query_transport_model(
            &self,
            selector: &BeamPathSelector,
        ) -> Result<ModelSnapshot, EngineError>;
        async fn list_elements(
            &self,
            pattern: &str,
            convention: &str,
        ) -> Result<Vec<EngineName>, EngineError>;
        async fn convert_names(&self, names: &[String]) -> Result<Vec<EngineName>, EngineError>;
        async fn quit(&self) -> Result<(), EngineError>;
    }
}

/// Matrix with `r{i}{j}` = `seed + i * 10 + j` (1-based i, j)
pub fn matrix(seed: f64) -> Matrix6 {
    let mut m = [[Numeric::Real(0.0); 6]; 6];
    for (i, row) in m.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = Numeric::Real(seed + ((i + 1) * 10 + j + 1) as f64);
        }
    }
    m
}

/// A consistent snapshot for the given element names
pub fn snapshot(names: &[&str]) -> ModelSnapshot {
    let k = names.len();
    let positions: Vec<f64> = (0..k).map(|i| 10.0 + i as f64).collect();
    ModelSnapshot {
        matrices: (0..k).map(|e| matrix(e as f64 * 100.0)).collect(),
        positions: vec![positions.clone(), positions],
        lengths: vec![vec![0.5; k], vec![0.5; k]],
        twiss: (0..11)
            .map(|p| (0..k).map(|e| Numeric::Real((p * 10 + e) as f64)).collect())
            .collect(),
        energy: serde_json::json!(4.0),
        names: names.iter().map(|n| (*n).to_string()).collect(),
    }
}
