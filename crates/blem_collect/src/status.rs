//! Operator status string
//!
//! The `STAT` PV holds the latest status line, sized for a fixed-width
//! display field. Every line is mirrored to the log.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bus::{PvBus, ScalarValue};

const ELLIPSIS: &str = "...";

/// Writes prefixed, truncated status lines to `<namespace>:STAT`
#[derive(Clone)]
pub struct StatusWriter {
    bus: Arc<dyn PvBus>,
    pv: String,
    width: usize,
}

impl StatusWriter {
    pub fn new(bus: Arc<dyn PvBus>, namespace: &str, width: usize) -> Self {
        Self {
            bus,
            pv: format!("{namespace}:STAT"),
            width,
        }
    }

    pub fn pv(&self) -> &str {
        &self.pv
    }

    pub async fn info(&self, msg: &str) {
        info!(status = %msg, "Status");
        self.write(format_status(msg, false, self.width)).await;
    }

    pub async fn error(&self, msg: &str) {
        error!(status = %msg, "Status");
        self.write(format_status(msg, true, self.width)).await;
    }

    /// A failed write is logged and otherwise ignored
    async fn write(&self, line: String) {
        if let Err(e) = self.bus.put_scalar(&self.pv, ScalarValue::Text(line)).await {
            warn!(pv = %self.pv, error = %e, "Failed to write status");
        }
    }
}

/// `"[INFO] - msg"` or `"[ERROR] - msg"`, cut to `width - 4` characters plus
/// `"..."` when longer than `width`.
pub fn format_status(msg: &str, is_error: bool, width: usize) -> String {
    let level = if is_error { "ERROR" } else { "INFO" };
    let line = format!("[{level}] - {msg}");
    if line.chars().count() <= width {
        return line;
    }
    let keep = width.saturating_sub(ELLIPSIS.len() + 1);
    let mut cut: String = line.chars().take(keep).collect();
    cut.push_str(ELLIPSIS);
    cut
}
