//! Attendance records
//!
//! One row per (identity, section, session date), guarded by a UNIQUE
//! constraint. Every write path is an insert-or-ignore followed by a
//! conditional update, so concurrent writers converge on a single row.

use crate::models::{AttendanceRecord, AttendanceStatus, RecordSource, SessionSeries};
use crate::pagination::{calculate_pagination, Pagination};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool};
use tracing::error;
use ua_common::time::{local_instant, now, to_db_date, to_db_timestamp};
use ua_common::{Error, Result};

const RECORD_COLUMNS: &str = "id, identity_id, section_id, session_date, status, first_seen, \
     last_seen, device_id, first_scan_id, last_scan_id, source";

/// Inputs for applying one scan to the day's record
#[derive(Debug, Clone)]
pub struct ScanTouch<'a> {
    pub identity_id: i64,
    pub section: &'a SessionSeries,
    pub session_date: NaiveDate,
    /// Civil offset the session date was computed in
    pub utc_offset_minutes: i32,
    pub scanned_at: DateTime<Utc>,
    pub device_id: Option<&'a str>,
    pub scan_id: i64,
}

/// Effect of a scan on the day's record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanApplied {
    pub record: AttendanceRecord,
    /// This scan created the record
    pub created: bool,
    /// This scan moved `last_seen`
    pub advanced: bool,
}

/// PRESENT or LATE for an arrival at `arrived` to a session starting at `start`
///
/// LATE only when strictly after start + threshold.
pub fn classify_arrival(arrived: DateTime<Utc>, start: DateTime<Utc>, late_threshold_minutes: i64) -> AttendanceStatus {
    if arrived > start + Duration::minutes(late_threshold_minutes) {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

/// Get-or-create the day's record for a scan
///
/// Creation decides the status once. A later scan only advances
/// `last_seen` when at least `cooldown_seconds` have passed since the
/// stored `last_seen`; the status never changes. A record created by the
/// closer keeps ABSENT but gains its first sighting.
pub async fn record_scan(
    db: &SqlitePool,
    touch: &ScanTouch<'_>,
    late_threshold_minutes: i64,
    cooldown_seconds: i64,
) -> Result<ScanApplied> {
    let start = local_instant(touch.session_date, touch.section.start_time, touch.utc_offset_minutes);
    let status = classify_arrival(touch.scanned_at, start, late_threshold_minutes);
    let seen = to_db_timestamp(touch.scanned_at);
    let session_date = to_db_date(touch.session_date);

    let mut tx = db.begin().await?;

    // Insert first: the loser of a concurrent race becomes an ordinary
    // repeat scan instead of a constraint error
    let inserted = sqlx::query(
        "INSERT INTO attendance
            (identity_id, section_id, session_date, status, first_seen, last_seen,
             device_id, first_scan_id, last_scan_id, source, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(identity_id, section_id, session_date) DO NOTHING",
    )
    .bind(touch.identity_id)
    .bind(touch.section.id)
    .bind(&session_date)
    .bind(status.as_str())
    .bind(&seen)
    .bind(&seen)
    .bind(touch.device_id)
    .bind(touch.scan_id)
    .bind(touch.scan_id)
    .bind(RecordSource::Scan.as_str())
    .bind(to_db_timestamp(now()))
    .execute(&mut *tx)
    .await?;

    let created = inserted.rows_affected() == 1;

    let advanced = if created {
        true
    } else {
        let cutoff = to_db_timestamp(touch.scanned_at - Duration::seconds(cooldown_seconds));
        let updated = sqlx::query(
            "UPDATE attendance
             SET last_seen = ?,
                 last_scan_id = ?,
                 first_seen = COALESCE(first_seen, ?),
                 first_scan_id = COALESCE(first_scan_id, ?),
                 device_id = COALESCE(device_id, ?)
             WHERE identity_id = ? AND section_id = ? AND session_date = ?
               AND (last_seen IS NULL OR last_seen <= ?)",
        )
        .bind(&seen)
        .bind(touch.scan_id)
        .bind(&seen)
        .bind(touch.scan_id)
        .bind(touch.device_id)
        .bind(touch.identity_id)
        .bind(touch.section.id)
        .bind(&session_date)
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;
        updated.rows_affected() == 1
    };

    let rows = sqlx::query(&format!(
        "SELECT {} FROM attendance WHERE identity_id = ? AND section_id = ? AND session_date = ?",
        RECORD_COLUMNS
    ))
    .bind(touch.identity_id)
    .bind(touch.section.id)
    .bind(&session_date)
    .fetch_all(&mut *tx)
    .await?;

    let record = single_record(rows, touch.identity_id, touch.section.id, touch.session_date)?;
    tx.commit().await?;

    Ok(ScanApplied {
        record,
        created,
        advanced,
    })
}

/// Exactly one row or an invariant violation
fn single_record(
    rows: Vec<sqlx::sqlite::SqliteRow>,
    identity_id: i64,
    section_id: i64,
    session_date: NaiveDate,
) -> Result<AttendanceRecord> {
    match rows.as_slice() {
        [row] => AttendanceRecord::from_row(row),
        _ => {
            error!(
                identity_id,
                section_id,
                %session_date,
                rows = rows.len(),
                "Attendance uniqueness violated"
            );
            Err(Error::InvariantViolation(format!(
                "{} attendance rows for identity {} section {} on {}",
                rows.len(),
                identity_id,
                section_id,
                session_date
            )))
        }
    }
}

/// Insert an unbacked ABSENT record unless any record exists
///
/// Returns true when a row was inserted.
pub async fn insert_absence<'e, E>(
    executor: E,
    identity_id: i64,
    section_id: i64,
    session_date: NaiveDate,
) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO attendance
            (identity_id, section_id, session_date, status, source, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(identity_id, section_id, session_date) DO NOTHING",
    )
    .bind(identity_id)
    .bind(section_id)
    .bind(to_db_date(session_date))
    .bind(AttendanceStatus::Absent.as_str())
    .bind(RecordSource::Closer.as_str())
    .bind(to_db_timestamp(now()))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// The day's record, if any
pub async fn get_for_day(
    db: &SqlitePool,
    identity_id: i64,
    section_id: i64,
    session_date: NaiveDate,
) -> Result<Option<AttendanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM attendance WHERE identity_id = ? AND section_id = ? AND session_date = ?",
        RECORD_COLUMNS
    ))
    .bind(identity_id)
    .bind(section_id)
    .bind(to_db_date(session_date))
    .fetch_all(db)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }
    single_record(rows, identity_id, section_id, session_date).map(Some)
}

/// Per-status totals for one enrollment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceCounts {
    pub present: u32,
    pub late: u32,
    pub absent: u32,
}

pub async fn counts_for(db: &SqlitePool, identity_id: i64, section_id: i64) -> Result<AttendanceCounts> {
    let (present, late, absent): (i64, i64, i64) = sqlx::query_as(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'PRESENT' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'LATE' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'ABSENT' THEN 1 ELSE 0 END), 0)
         FROM attendance
         WHERE identity_id = ? AND section_id = ?",
    )
    .bind(identity_id)
    .bind(section_id)
    .fetch_one(db)
    .await?;

    Ok(AttendanceCounts {
        present: present.max(0) as u32,
        late: late.max(0) as u32,
        absent: absent.max(0) as u32,
    })
}

/// Filters for the attendance listing; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttendanceFilter {
    pub identity_id: Option<i64>,
    pub section_id: Option<i64>,
    pub status: Option<AttendanceStatus>,
    pub device_id: Option<String>,
    /// Inclusive lower bound on session date
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on session date
    pub to: Option<NaiveDate>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// One page of listing results
#[derive(Debug, Clone, Serialize)]
pub struct AttendancePage {
    pub records: Vec<AttendanceRecord>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

/// Newest session date first, then newest record
pub async fn list(db: &SqlitePool, filter: &AttendanceFilter) -> Result<AttendancePage> {
    const WHERE: &str = "WHERE (?1 IS NULL OR identity_id = ?1)
           AND (?2 IS NULL OR section_id = ?2)
           AND (?3 IS NULL OR status = ?3)
           AND (?4 IS NULL OR device_id = ?4)
           AND (?5 IS NULL OR session_date >= ?5)
           AND (?6 IS NULL OR session_date <= ?6)";

    let status = filter.status.map(|s| s.as_str());
    let device = filter.device_id.as_deref().map(str::trim).filter(|d| !d.is_empty());
    let from = filter.from.map(to_db_date);
    let to = filter.to.map(to_db_date);

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM attendance {}", WHERE))
        .bind(filter.identity_id)
        .bind(filter.section_id)
        .bind(status)
        .bind(device)
        .bind(from.as_deref())
        .bind(to.as_deref())
        .fetch_one(db)
        .await?;

    let Pagination {
        page,
        page_size,
        total_pages,
        offset,
    } = calculate_pagination(total, filter.page, filter.page_size);

    let rows = sqlx::query(&format!(
        "SELECT {} FROM attendance {} ORDER BY session_date DESC, id DESC LIMIT ?7 OFFSET ?8",
        RECORD_COLUMNS, WHERE
    ))
    .bind(filter.identity_id)
    .bind(filter.section_id)
    .bind(status)
    .bind(device)
    .bind(from.as_deref())
    .bind(to.as_deref())
    .bind(page_size)
    .bind(offset)
    .fetch_all(db)
    .await?;

    Ok(AttendancePage {
        records: rows.iter().map(AttendanceRecord::from_row).collect::<Result<Vec<_>>>()?,
        total,
        page,
        page_size,
        total_pages,
    })
}
