//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole unix seconds for a timestamp
pub fn unix_seconds(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

/// Convert unix seconds back to a UTC timestamp
///
/// Returns `None` for values chrono cannot represent.
pub fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
