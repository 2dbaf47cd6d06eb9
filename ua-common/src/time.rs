//! Timestamp utilities
//!
//! On-disk formats:
//! - instants: RFC 3339 UTC with millisecond precision (`2025-03-04T09:12:00.000Z`),
//!   so text order equals time order
//! - calendar dates: `YYYY-MM-DD`
//! - wall-clock times: `HH:MM:SS`

use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, SecondsFormat, Utc};
use tracing::warn;

/// Wall-clock time format used by the `sections` table
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Calendar date format used by the `attendance` table
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format an instant for storage
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored instant
pub fn parse_db_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp '{}': {}", raw, e)))
}

/// Format a wall-clock time for storage
pub fn to_db_time(t: NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a stored wall-clock time; accepts `HH:MM` as well
pub fn parse_db_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|e| Error::InvalidInput(format!("Bad time '{}': {}", raw, e)))
}

/// Format a calendar date for storage
pub fn to_db_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Parse a stored calendar date
pub fn parse_db_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| Error::InvalidInput(format!("Bad date '{}': {}", raw, e)))
}

/// Fixed offset for a minutes-east-of-UTC value
///
/// Out-of-range offsets fall back to UTC.
pub fn fixed_offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| {
        warn!(utc_offset_minutes, "UTC offset out of range, using UTC");
        Utc.fix()
    })
}

/// Convert an instant to local civil time at the given offset
pub fn to_local(ts: DateTime<Utc>, utc_offset_minutes: i32) -> DateTime<FixedOffset> {
    ts.with_timezone(&fixed_offset(utc_offset_minutes))
}

/// The instant at which `date` + `time` occurs at the given offset
pub fn local_instant(date: NaiveDate, time: NaiveTime, utc_offset_minutes: i32) -> DateTime<Utc> {
    let naive = date.and_time(time);
    let offset = fixed_offset(utc_offset_minutes);
    // Fixed offsets have exactly one mapping for every local time
    DateTime::<FixedOffset>::from_naive_utc_and_offset(naive - offset, offset).with_timezone(&Utc)
}
