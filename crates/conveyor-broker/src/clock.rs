//! Wall-clock helpers.
//!
//! All scores and timestamps on the wire are fractional epoch seconds, so
//! readings from different processes compare directly.

use chrono::Utc;

/// Current wall-clock time as fractional epoch seconds.
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
