//! Catalog collaborator
//!
//! Sections (session series) are reference data for the engine: it reads
//! time windows and rosters, and only writes here when seeding.

use crate::models::{DayBucket, Identity, SectionStatus, SessionSeries, Term};
use chrono::NaiveTime;
use sqlx::SqlitePool;
use ua_common::time::{now, to_db_time, to_db_timestamp};
use ua_common::{Error, Result};

pub(crate) const SECTION_COLUMNS: &str = "s.id, s.course_code, s.course_name, s.staff_id, s.year, \
     s.term, s.class_name, s.day_bucket, s.start_time, s.end_time, s.capacity, s.status";

/// Fields for a new section
#[derive(Debug, Clone)]
pub struct NewSection {
    pub course_code: String,
    pub course_name: String,
    pub staff_id: i64,
    pub year: i32,
    pub term: Term,
    pub class_name: String,
    pub day_bucket: DayBucket,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i64,
}

/// Insert a section after validating its window and capacity
pub async fn create_section(db: &SqlitePool, section: &NewSection) -> Result<SessionSeries> {
    if section.end_time <= section.start_time {
        return Err(Error::InvalidInput(format!(
            "end time {} must be after start time {}",
            section.end_time, section.start_time
        )));
    }
    if section.capacity <= 0 {
        return Err(Error::InvalidInput("capacity must be positive".to_string()));
    }

    let result = sqlx::query(
        "INSERT INTO sections
            (course_code, course_name, staff_id, year, term, class_name,
             day_bucket, start_time, end_time, capacity, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)",
    )
    .bind(section.course_code.trim())
    .bind(section.course_name.trim())
    .bind(section.staff_id)
    .bind(section.year)
    .bind(section.term.as_str())
    .bind(section.class_name.trim())
    .bind(section.day_bucket.code())
    .bind(to_db_time(section.start_time))
    .bind(to_db_time(section.end_time))
    .bind(section.capacity)
    .bind(to_db_timestamp(now()))
    .execute(db)
    .await
    .map_err(Error::from)
    .map_err(|e| {
        if e.is_unique_violation() {
            Error::Conflict(format!(
                "section {} {} already exists for this staff member and term",
                section.course_code, section.class_name
            ))
        } else {
            e
        }
    })?;

    get_section(db, result.last_insert_rowid())
        .await?
        .ok_or_else(|| Error::Internal("section vanished after insert".to_string()))
}

pub async fn get_section(db: &SqlitePool, id: i64) -> Result<Option<SessionSeries>> {
    let row = sqlx::query(&format!("SELECT {} FROM sections s WHERE s.id = ?", SECTION_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await?;
    row.as_ref().map(SessionSeries::from_row).transpose()
}

/// Active sections meeting on `bucket`, ordered by start time then id
pub async fn sections_for_bucket(db: &SqlitePool, bucket: DayBucket) -> Result<Vec<SessionSeries>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM sections s
         WHERE s.day_bucket = ? AND s.status = ?
         ORDER BY s.start_time, s.id",
        SECTION_COLUMNS
    ))
    .bind(bucket.code())
    .bind(SectionStatus::Active.as_str())
    .fetch_all(db)
    .await?;

    rows.iter().map(SessionSeries::from_row).collect()
}

/// Sections the identity is enrolled in, any status
pub async fn sections_for_identity(db: &SqlitePool, identity_id: i64) -> Result<Vec<SessionSeries>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM sections s
         JOIN enrollments e ON e.section_id = s.id
         WHERE e.identity_id = ?
         ORDER BY s.day_bucket, s.start_time, s.id",
        SECTION_COLUMNS
    ))
    .bind(identity_id)
    .fetch_all(db)
    .await?;

    rows.iter().map(SessionSeries::from_row).collect()
}

/// Roster of a section
pub async fn enrolled_identities(db: &SqlitePool, section_id: i64) -> Result<Vec<Identity>> {
    let rows = sqlx::query(
        "SELECT u.id, u.username, u.display_name, u.role, u.utc_offset_minutes
         FROM enrollments e
         JOIN users u ON u.id = e.identity_id
         WHERE e.section_id = ?
         ORDER BY u.id",
    )
    .bind(section_id)
    .fetch_all(db)
    .await?;

    rows.iter().map(Identity::from_row).collect()
}

/// Mark a section active or inactive
pub async fn set_section_status(db: &SqlitePool, id: i64, status: SectionStatus) -> Result<()> {
    let result = sqlx::query("UPDATE sections SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("section {}", id)));
    }
    Ok(())
}
