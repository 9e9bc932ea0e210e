//! Time conversion helpers

use chrono::{DateTime, TimeZone, Utc};

/// Convert nanoseconds since Unix epoch to a UTC datetime.
///
/// Out-of-range values clamp to the epoch rather than panicking; OTLP
/// exporters occasionally send zero or garbage timestamps.
pub fn nanos_to_datetime(nanos: u64) -> DateTime<Utc> {
    let secs = (nanos / 1_000_000_000) as i64;
    let subsec = (nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, subsec).single().unwrap_or_default()
}

/// Bridge from chrono to `time::OffsetDateTime` for ClickHouse column serde.
pub fn chrono_to_time(dt: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp_nanos(
        dt.timestamp_micros() as i128 * 1_000,
    )
    .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
}

/// Bridge back from `time::OffsetDateTime` to chrono.
pub fn time_to_chrono(dt: time::OffsetDateTime) -> DateTime<Utc> {
    Utc.timestamp_opt(dt.unix_timestamp(), dt.nanosecond())
        .single()
        .unwrap_or_default()
}

/// Duration in whole milliseconds between two datetimes, if the end is known.
pub fn duration_ms(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Option<i64> {
    end.map(|e| (e - start).num_milliseconds())
}
