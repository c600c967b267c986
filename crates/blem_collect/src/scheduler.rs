//! Cadence scheduler
//!
//! Runs sync cycles back to back at no more than one per period. A cycle
//! that finishes early waits out the rest of the period; a cycle that
//! overruns is followed immediately by the next one, with no catch-up.
//!
//! Shutdown is checked before every cycle and raced against both the
//! cycle and the wait. The runner is closed exactly once on the way out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info};

/// One unit of periodic work
#[async_trait]
pub trait CycleRunner: Send {
    /// Run one cycle. Returns `true` when nothing failed.
    async fn run_cycle(&mut self) -> bool;

    /// Release resources; called once when the scheduler stops
    async fn close(&mut self);
}

/// What a scheduler run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSummary {
    /// Cycles that ran to completion
    pub cycles: u64,
    /// Completed cycles with no failure
    pub clean_cycles: u64,
    /// Stopped by the shutdown signal
    pub interrupted: bool,
}

/// Fixed-ceiling cycle driver
#[derive(Debug, Clone)]
pub struct CadenceScheduler {
    period: Duration,
    max_cycles: Option<u64>,
}

impl CadenceScheduler {
    /// Run until shutdown, starting at most one cycle per `period`
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            max_cycles: None,
        }
    }

    /// Run a single cycle, then stop
    pub fn once(period: Duration) -> Self {
        Self::new(period).with_max_cycles(1)
    }

    #[must_use]
    pub fn with_max_cycles(mut self, max: u64) -> Self {
        self.max_cycles = Some(max);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Drive `runner` until `shutdown` resolves or the cycle limit is hit.
    pub async fn run<R, F>(&self, runner: &mut R, shutdown: F) -> SchedulerSummary
    where
        R: CycleRunner + ?Sized,
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = SchedulerSummary::default();

        info!(period_ms = self.period.as_millis() as u64, "Scheduler started");
        loop {
            if let Some(max) = self.max_cycles
                && summary.cycles >= max
            {
                break;
            }

            tokio::select! {
                biased;
                () = &mut shutdown => {
                    summary.interrupted = true;
                    break;
                }
                _ = ticker.tick() => {}
            }

            let start = Instant::now();
            let clean = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown during cycle");
                    summary.interrupted = true;
                    break;
                }
                clean = runner.run_cycle() => clean,
            };

            summary.cycles += 1;
            if clean {
                summary.clean_cycles += 1;
            }
            debug!(
                cycle = summary.cycles,
                clean,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Cycle finished"
            );
        }

        runner.close().await;
        info!(
            cycles = summary.cycles,
            clean_cycles = summary.clean_cycles,
            interrupted = summary.interrupted,
            "Scheduler stopped"
        );
        summary
    }
}
