//! Session resolver
//!
//! Two entry points with different strictness:
//! - [`find_active_session`] requires enrollment and feeds attendance writes
//! - [`sections_running_at`] ignores enrollment and only answers
//!   "is anything happening right now" for diagnostics

use crate::catalog::{self, SECTION_COLUMNS};
use crate::models::{DayBucket, Identity, SectionStatus, SessionSeries};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;
use ua_common::time::to_local;
use ua_common::Result;

/// An instant seen in one person's civil time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalMoment {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub bucket: DayBucket,
    pub utc_offset_minutes: i32,
}

impl LocalMoment {
    pub fn at(ts: DateTime<Utc>, utc_offset_minutes: i32) -> Self {
        let local = to_local(ts, utc_offset_minutes);
        Self {
            date: local.date_naive(),
            time: local.time(),
            bucket: DayBucket::for_weekday(local.weekday()),
            utc_offset_minutes,
        }
    }
}

/// The one enrolled section running for `identity` at `ts`
///
/// Active status, matching bucket and `start <= time <= end` in the
/// identity's civil time. Overlaps are normally excluded at enrollment;
/// if they occur the earliest start (then lowest id) wins.
pub async fn find_active_session(
    db: &SqlitePool,
    identity: &Identity,
    ts: DateTime<Utc>,
) -> Result<Option<SessionSeries>> {
    let moment = LocalMoment::at(ts, identity.utc_offset_minutes);

    let rows = sqlx::query(&format!(
        "SELECT {} FROM sections s
         JOIN enrollments e ON e.section_id = s.id
         WHERE e.identity_id = ? AND s.day_bucket = ? AND s.status = ?
         ORDER BY s.start_time, s.id",
        SECTION_COLUMNS
    ))
    .bind(identity.id)
    .bind(moment.bucket.code())
    .bind(SectionStatus::Active.as_str())
    .fetch_all(db)
    .await?;

    let running: Vec<SessionSeries> = rows
        .iter()
        .map(SessionSeries::from_row)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|s| s.contains(moment.time))
        .collect();

    if running.len() > 1 {
        warn!(
            identity_id = identity.id,
            sections = ?running.iter().map(|s| s.id).collect::<Vec<_>>(),
            "Overlapping enrolled sections running; using earliest start"
        );
    }

    Ok(running.into_iter().min_by_key(|s| (s.start_time, s.id)))
}

/// Every active section running at `moment`, enrollment ignored
pub async fn sections_running_at(db: &SqlitePool, moment: &LocalMoment) -> Result<Vec<SessionSeries>> {
    Ok(catalog::sections_for_bucket(db, moment.bucket)
        .await?
        .into_iter()
        .filter(|s| s.contains(moment.time))
        .collect())
}
