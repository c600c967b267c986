//! One synchronization pass
//!
//! A cycle queries the engine once, then runs the RMAT and TWISS sequences
//! one after the other. Each sequence is
//! fetch record → project → assign → publish → stamp `_TOD` → bump `_CNT`,
//! and a failure anywhere in it is confined to that table. Nothing here
//! escalates to the scheduler; the next cycle is the retry.

use async_trait::async_trait;
use blem_config::BusConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::bus::{PvBus, ScalarValue};
use crate::engine::ModelEngine;
use crate::index::ElementDeviceIndex;
use crate::projector::{ProjectionInput, TableKind, project};
use crate::scheduler::CycleRunner;
use crate::selector::BeamPathSelector;
use crate::status::StatusWriter;
use crate::{FailureKind, SyncError};

/// Freshness stamp layout, second precision
pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Options and results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Display width of the status PV
    pub status_width: usize,
    /// Maintain `_CNT` and `ERR_CNT` counters
    pub track_counters: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            status_width: 40,
            track_counters: true,
        }
    }
}

impl From<&BusConfig> for SyncOptions {
    fn from(config: &BusConfig) -> Self {
        Self {
            status_width: config.status_width,
            track_counters: config.track_counters,
        }
    }
}

/// Result of one table's sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableOutcome {
    Succeeded { stamp: String },
    Failed { kind: FailureKind, reason: String },
}

impl TableOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Outcomes of both tables for one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub rmat: TableOutcome,
    pub twiss: TableOutcome,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.rmat.is_success() && self.twiss.is_success()
    }
}

// ============================================================================
// Sync cycle
// ============================================================================

/// Publishes one selector's model to its namespace
pub struct SyncCycle {
    selector: BeamPathSelector,
    namespace: String,
    engine: Arc<dyn ModelEngine>,
    bus: Arc<dyn PvBus>,
    index: Arc<ElementDeviceIndex>,
    options: SyncOptions,
    status: StatusWriter,
}

impl SyncCycle {
    /// `pv_prefix` is combined with the selector into the namespace
    pub fn new(
        selector: BeamPathSelector,
        pv_prefix: &str,
        engine: Arc<dyn ModelEngine>,
        bus: Arc<dyn PvBus>,
        index: Arc<ElementDeviceIndex>,
        options: SyncOptions,
    ) -> Self {
        let namespace = selector.namespace(pv_prefix);
        let status = StatusWriter::new(bus.clone(), &namespace, options.status_width);
        Self {
            selector,
            namespace,
            engine,
            bus,
            index,
            options,
            status,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Run one full pass over both tables
    #[instrument(
        skip(self),
        fields(beam_path = %self.selector.beam_path, model_type = %self.selector.model_type)
    )]
    pub async fn run_once(&self) -> CycleReport {
        let start = Instant::now();
        self.status.info(&format!("Updating {}", self.selector)).await;

        let (rmat, twiss) = match self.engine.query_transport_model(&self.selector).await {
            Ok(snapshot) => {
                let devices = self.index.devices(&snapshot.names);
                let common = ProjectionInput {
                    names: &snapshot.names,
                    devices: &devices,
                    positions: &snapshot.positions,
                    lengths: &snapshot.lengths,
                    matrices: None,
                    twiss: None,
                };
                let rmat = self
                    .publish_table(
                        TableKind::Rmat,
                        ProjectionInput {
                            matrices: Some(&snapshot.matrices),
                            ..common
                        },
                    )
                    .await;
                let twiss = self
                    .publish_table(
                        TableKind::Twiss,
                        ProjectionInput {
                            twiss: Some(&snapshot.twiss),
                            ..common
                        },
                    )
                    .await;
                (rmat, twiss)
            }
            Err(e) => {
                let err = SyncError::from(e);
                let rmat = self.fail(TableKind::Rmat, &err).await;
                let twiss = self.fail(TableKind::Twiss, &err).await;
                (rmat, twiss)
            }
        };

        let report = CycleReport {
            rmat,
            twiss,
            elapsed: start.elapsed(),
        };
        self.status.info(&self.end_status(&report)).await;
        info!(
            clean = report.is_clean(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cycle complete"
        );
        report
    }

    /// `Updated <path> <type>`, marking a table that was not published
    fn end_status(&self, report: &CycleReport) -> String {
        match (report.rmat.is_success(), report.twiss.is_success()) {
            (true, true) => format!("Updated {}", self.selector),
            (false, true) => format!("Updated {} (no RMAT)", self.selector),
            (true, false) => format!("Updated {} (no TWISS)", self.selector),
            (false, false) => format!("Update failed {}", self.selector),
        }
    }

    async fn publish_table(&self, kind: TableKind, input: ProjectionInput<'_>) -> TableOutcome {
        match self.try_publish(kind, &input).await {
            Ok(stamp) => {
                info!(table = kind.as_str(), rows = input.names.len(), "Table published");
                TableOutcome::Succeeded { stamp }
            }
            Err(e) => self.fail(kind, &e).await,
        }
    }

    async fn try_publish(
        &self,
        kind: TableKind,
        input: &ProjectionInput<'_>,
    ) -> Result<String, SyncError> {
        let pv = kind.pv(&self.namespace);
        let mut record = self.bus.get_table(&pv).await?;
        let payload = project(input)?;
        payload.write_into(&mut record)?;
        self.bus.put_table(&pv, &record).await?;

        let stamp = chrono::Local::now().format(STAMP_FORMAT).to_string();
        self.bus
            .put_scalar(&kind.tod_pv(&self.namespace), ScalarValue::Text(stamp.clone()))
            .await?;
        if self.options.track_counters {
            self.bus.increment(&kind.cnt_pv(&self.namespace)).await?;
        }
        Ok(stamp)
    }

    async fn fail(&self, kind: TableKind, err: &SyncError) -> TableOutcome {
        error!(
            table = kind.as_str(),
            kind = err.kind().as_str(),
            reason = %err,
            "Table update failed"
        );
        self.status.error(&format!("{kind} {err}")).await;
        if self.options.track_counters {
            let pv = format!("{}:ERR_CNT", self.namespace);
            if let Err(e) = self.bus.increment(&pv).await {
                warn!(pv = %pv, error = %e, "Failed to bump error counter");
            }
        }
        TableOutcome::Failed {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl CycleRunner for SyncCycle {
    async fn run_cycle(&mut self) -> bool {
        self.run_once().await.is_clean()
    }

    async fn close(&mut self) {
        self.status.info(&format!("Stopped {}", self.selector)).await;
        self.bus.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use crate::bus::{MemoryBus, TableRecord};
    use crate::selector::{BeamPath, ModelType, QueryType};
    use crate::test_support::{MockEngine, snapshot};
    use crate::value::{ModelSnapshot, Numeric};
    use blem_config::BeamPathPolicy;
    use serde_json::json;

    const PREFIX: &str = "BLEM:SYS0:1";
    const NS: &str = "BLEM:SYS0:1:SC_SXR:LIVE";

    fn selector() -> BeamPathSelector {
        BeamPathSelector::new(
            BeamPath::parse("SC_SXR", BeamPathPolicy::Strict).unwrap(),
            ModelType::Live,
        )
    }

    fn engine_returning(snap: ModelSnapshot) -> MockEngine {
        let mut engine = MockEngine::new();
        engine
            .expect_query_transport_model()
            .withf(|sel| sel.query_type() == QueryType::Extant)
            .returning(move |_| Ok(snap.clone()));
        engine
    }

    fn index() -> Arc<ElementDeviceIndex> {
        Arc::new(
            [("BPM1".to_string(), "DEV:BPM1".to_string())]
                .into_iter()
                .collect(),
        )
    }

    fn cycle_with(engine: MockEngine, bus: Arc<MemoryBus>, options: SyncOptions) -> SyncCycle {
        SyncCycle::new(selector(), PREFIX, Arc::new(engine), bus, index(), options)
    }

    fn pv(suffix: &str) -> String {
        format!("{NS}:{suffix}")
    }

    fn statuses(bus: &MemoryBus) -> Vec<String> {
        bus.history(&pv("STAT")).iter().map(ToString::to_string).collect()
    }

    fn is_stamp(s: &str) -> bool {
        chrono::NaiveDateTime::parse_from_str(s, STAMP_FORMAT).is_ok()
    }

    #[tokio::test]
    async fn test_clean_cycle_publishes_both_tables() {
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        let cycle = cycle_with(
            engine_returning(snapshot(&["BPM1", "BPM2", "QUAD1"])),
            bus.clone(),
            SyncOptions::default(),
        );
        assert_eq!(cycle.namespace(), NS);

        let report = cycle.run_once().await;
        assert!(report.is_clean());

        let rmat = bus.table(&pv("RMAT")).unwrap();
        assert_eq!(
            rmat.text_column("device_name"),
            Some(vec!["DEV:BPM1".to_string(), "BPM2".into(), "QUAD1".into()])
        );
        assert_eq!(rmat.real_column("r11"), Some(vec![11.0, 111.0, 211.0]));
        assert_eq!(rmat.real_column("r66"), Some(vec![66.0, 166.0, 266.0]));
        assert_eq!(rmat.real_column("s"), rmat.real_column("z"));

        let twiss = bus.table(&pv("TWISS")).unwrap();
        assert_eq!(twiss.real_column("beta_x"), Some(vec![20.0, 21.0, 22.0]));
        assert_eq!(twiss.text_column("element").unwrap().len(), 3);

        for table in ["RMAT", "TWISS"] {
            let tod = bus.scalar(&pv(&format!("{table}_TOD"))).unwrap();
            assert!(is_stamp(&tod.to_string()), "bad stamp {tod}");
            assert_eq!(bus.scalar(&pv(&format!("{table}_CNT"))), Some(ScalarValue::Int(1)));
        }
        assert_eq!(bus.scalar(&pv("ERR_CNT")), Some(ScalarValue::Int(0)));

        assert_eq!(
            statuses(&bus),
            vec!["[INFO] - Updating SC_SXR LIVE", "[INFO] - Updated SC_SXR LIVE"]
        );
        match &report.rmat {
            TableOutcome::Succeeded { stamp } => assert!(is_stamp(stamp)),
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_counters_advance_each_cycle() {
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        let cycle = cycle_with(
            engine_returning(snapshot(&["Q1"])),
            bus.clone(),
            SyncOptions::default(),
        );
        for _ in 0..3 {
            cycle.run_once().await;
        }
        assert_eq!(bus.scalar(&pv("RMAT_CNT")), Some(ScalarValue::Int(3)));
        assert_eq!(bus.scalar(&pv("TWISS_CNT")), Some(ScalarValue::Int(3)));
    }

    #[tokio::test]
    async fn test_complex_rmat_does_not_block_twiss() {
        let mut snap = snapshot(&["BPM1", "BPM2"]);
        snap.matrices[0][1][2] = Numeric::Complex { re: 0.0, im: 1.0 };
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        let cycle = cycle_with(engine_returning(snap), bus.clone(), SyncOptions::default());

        let report = cycle.run_once().await;

        assert_eq!(report.rmat.failure_kind(), Some(FailureKind::DataType));
        assert!(report.twiss.is_success());
        assert!(!report.is_clean());

        assert_eq!(bus.table_puts(&pv("RMAT")), 0);
        assert_eq!(bus.table_puts(&pv("TWISS")), 1);
        assert_eq!(bus.scalar(&pv("RMAT_TOD")), Some(ScalarValue::Text(String::new())));
        assert_eq!(bus.scalar(&pv("RMAT_CNT")), Some(ScalarValue::Int(0)));
        assert_eq!(bus.scalar(&pv("TWISS_CNT")), Some(ScalarValue::Int(1)));
        assert_eq!(bus.scalar(&pv("ERR_CNT")), Some(ScalarValue::Int(1)));

        let statuses = statuses(&bus);
        assert_eq!(statuses.len(), 3);
        assert!(statuses[1].starts_with("[ERROR] - RMAT data type"));
        assert_eq!(statuses[2], "[INFO] - Updated SC_SXR LIVE (no RMAT)");
    }

    #[tokio::test]
    async fn test_engine_failure_fails_both_tables() {
        let mut engine = MockEngine::new();
        engine
            .expect_query_transport_model()
            .returning(|_| Err(EngineError::Timeout(Duration::from_secs(120))));
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        let cycle = cycle_with(engine, bus.clone(), SyncOptions::default());

        let report = cycle.run_once().await;

        assert_eq!(report.rmat.failure_kind(), Some(FailureKind::Transport));
        assert_eq!(report.twiss.failure_kind(), Some(FailureKind::Transport));
        assert_eq!(bus.table_puts(&pv("RMAT")), 0);
        assert_eq!(bus.table_puts(&pv("TWISS")), 0);
        assert_eq!(bus.scalar(&pv("ERR_CNT")), Some(ScalarValue::Int(2)));
        assert_eq!(
            statuses(&bus).last().map(String::as_str),
            Some("[INFO] - Update failed SC_SXR LIVE")
        );
    }

    #[tokio::test]
    async fn test_bus_failure_is_isolated() {
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        bus.fail_on(&pv("TWISS"), "channel disconnected");
        let cycle = cycle_with(
            engine_returning(snapshot(&["Q1", "Q2"])),
            bus.clone(),
            SyncOptions::default(),
        );

        let report = cycle.run_once().await;

        assert!(report.rmat.is_success());
        assert_eq!(report.twiss.failure_kind(), Some(FailureKind::Transport));
        match &report.twiss {
            TableOutcome::Failed { reason, .. } => assert!(reason.contains("channel disconnected")),
            other => panic!("Expected failure, got {other:?}"),
        }
        assert_eq!(bus.scalar(&pv("RMAT_CNT")), Some(ScalarValue::Int(1)));
        assert_eq!(bus.scalar(&pv("TWISS_CNT")), Some(ScalarValue::Int(0)));
    }

    #[tokio::test]
    async fn test_failed_cycle_ends_with_end_status() {
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        bus.fail_on(&pv("TWISS"), "channel disconnected");
        let cycle = cycle_with(
            engine_returning(snapshot(&["Q1"])),
            bus.clone(),
            SyncOptions::default(),
        );

        cycle.run_once().await;

        assert_eq!(
            statuses(&bus),
            vec![
                "[INFO] - Updating SC_SXR LIVE",
                "[ERROR] - TWISS transport: channel d...",
                "[INFO] - Updated SC_SXR LIVE (no TWISS)",
            ]
        );
    }

    #[tokio::test]
    async fn test_timestamp_failure_skips_counter() {
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        bus.fail_on(&pv("RMAT_TOD"), "write refused");
        let cycle = cycle_with(
            engine_returning(snapshot(&["Q1"])),
            bus.clone(),
            SyncOptions::default(),
        );

        let report = cycle.run_once().await;

        assert_eq!(report.rmat.failure_kind(), Some(FailureKind::Transport));
        assert_eq!(bus.table_puts(&pv("RMAT")), 1);
        assert_eq!(bus.scalar(&pv("RMAT_CNT")), Some(ScalarValue::Int(0)));
        assert!(report.twiss.is_success());
    }

    #[tokio::test]
    async fn test_ragged_snapshot_is_invalid_argument() {
        let mut snap = snapshot(&["Q1", "Q2"]);
        snap.matrices.pop();
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        let cycle = cycle_with(engine_returning(snap), bus.clone(), SyncOptions::default());

        let report = cycle.run_once().await;
        assert_eq!(report.rmat.failure_kind(), Some(FailureKind::InvalidArgument));
        assert!(report.twiss.is_success());
    }

    #[tokio::test]
    async fn test_counters_can_be_disabled() {
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        bus.fail_on(&pv("RMAT"), "down");
        let options = SyncOptions {
            track_counters: false,
            ..SyncOptions::default()
        };
        let cycle = cycle_with(engine_returning(snapshot(&["Q1"])), bus.clone(), options);

        cycle.run_once().await;
        assert!(bus.history(&pv("TWISS_CNT")).is_empty());
        assert!(bus.history(&pv("ERR_CNT")).is_empty());
        assert!(bus.history(&pv("TWISS_TOD")).len() == 1);
    }

    #[tokio::test]
    async fn test_record_metadata_survives_cycle() {
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        bus.insert_table(
            &pv("RMAT"),
            TableRecord::from_json(json!({
                "labels": [],
                "value": {},
                "descriptor": "R matrices",
                "alarm": {"severity": 0, "status": 0},
            }))
            .unwrap(),
        );
        let cycle = cycle_with(
            engine_returning(snapshot(&["Q1"])),
            bus.clone(),
            SyncOptions::default(),
        );
        cycle.run_once().await;

        let rmat = bus.table(&pv("RMAT")).unwrap();
        assert_eq!(rmat.field("descriptor"), Some(&json!("R matrices")));
        assert_eq!(rmat.field("alarm"), Some(&json!({"severity": 0, "status": 0})));
        assert_eq!(rmat.column_names().len(), 41);
    }

    #[tokio::test]
    async fn test_close_closes_bus_once() {
        let bus = Arc::new(MemoryBus::for_namespace(NS));
        let mut cycle = cycle_with(MockEngine::new(), bus.clone(), SyncOptions::default());
        cycle.close().await;
        assert_eq!(bus.closed(), 1);
        assert_eq!(statuses(&bus), vec!["[INFO] - Stopped SC_SXR LIVE"]);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = TableOutcome::Failed {
            kind: FailureKind::DataType,
            reason: "r12[0] is not real".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["kind"], "data_type");
    }
}
