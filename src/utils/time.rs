//! Wall-clock helpers

use chrono::Utc;

/// Current wall-clock time as fractional unix seconds
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Round a duration in seconds to two decimals for status reports
pub fn round_centis(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}
