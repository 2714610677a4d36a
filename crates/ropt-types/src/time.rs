//! Millisecond wall-clock helper shared by every crate.

use chrono::Utc;

/// Current Unix time in milliseconds.
///
/// Clamps to zero for clocks set before the Unix epoch rather than
/// wrapping.
pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
