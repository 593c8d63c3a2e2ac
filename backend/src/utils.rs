use chrono::{DateTime, TimeZone, Utc};

pub fn ms_since_epoch(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Inverse of [`ms_since_epoch`]. Out-of-range values collapse to the epoch.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
