//! Beam-running check made before the service starts publishing
//!
//! Copper linac paths publish their rate as an enumeration whose labels
//! start with the rate (`"120 Hz"`); superconducting paths publish a number.

use tracing::{debug, warn};

use crate::bus::{PvBus, ScalarValue};
use crate::selector::BeamPath;

/// Rate in Hz from a rate PV value, if it can be read
pub fn parse_rate(path: &BeamPath, value: &ScalarValue) -> Option<f64> {
    if path.is_copper() {
        let label = match value {
            ScalarValue::Enum { .. } => value.enum_label()?,
            ScalarValue::Text(label) => label.as_str(),
            _ => return None,
        };
        let rate: i64 = label.split_whitespace().next()?.parse().ok()?;
        Some(rate as f64)
    } else {
        value.as_f64()
    }
}

/// Whether beam is being delivered down `path`.
///
/// An unreachable PV or an unreadable value counts as not running.
pub async fn beam_is_running(bus: &dyn PvBus, path: &BeamPath, rate_pv: &str) -> bool {
    let value = match bus.get_scalar(rate_pv).await {
        Ok(value) => value,
        Err(e) => {
            warn!(pv = %rate_pv, error = %e, "Rate PV unavailable");
            return false;
        }
    };
    match parse_rate(path, &value) {
        Some(rate) => {
            debug!(beam_path = %path, rate, "Beam rate");
            rate > 0.0
        }
        None => {
            warn!(pv = %rate_pv, value = %value, "Unreadable beam rate");
            false
        }
    }
}
