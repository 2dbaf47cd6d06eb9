//! Enrollment creation and lookup
//!
//! Enrollment is where schedule clashes are rejected, so the session
//! resolver normally sees at most one running section per identity.

use crate::catalog;
use crate::models::{Enrollment, SectionStatus};
use crate::registration::RegistrationGate;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::info;
use ua_common::time::{now, to_db_timestamp};
use ua_common::{Error, Result};

const ENROLLMENT_COLUMNS: &str =
    "id, identity_id, section_id, warning_level, failed_due_to_attendance";

/// Enroll an identity in a section
///
/// Rejects when the gate is closed on `on_date`, the section is inactive or
/// full, the identity is already enrolled, or another enrolled section
/// overlaps on the same day bucket.
pub async fn enroll(
    db: &SqlitePool,
    gate: &RegistrationGate,
    identity_id: i64,
    section_id: i64,
    on_date: NaiveDate,
) -> Result<Enrollment> {
    if !gate.is_open(on_date).await? {
        return Err(Error::Conflict(format!("registration is closed on {}", on_date)));
    }
    enroll_unchecked_gate(db, identity_id, section_id).await
}

/// Enroll without consulting the registration gate (administrative seeding)
pub async fn enroll_unchecked_gate(db: &SqlitePool, identity_id: i64, section_id: i64) -> Result<Enrollment> {
    let section = catalog::get_section(db, section_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("section {}", section_id)))?;

    if section.status != SectionStatus::Active {
        return Err(Error::Conflict(format!("section {} is inactive", section_id)));
    }

    if get_enrollment(db, identity_id, section_id).await?.is_some() {
        return Err(Error::Conflict(format!(
            "identity {} is already enrolled in section {}",
            identity_id, section_id
        )));
    }

    let current = catalog::sections_for_identity(db, identity_id).await?;
    if let Some(clash) = current
        .iter()
        .filter(|s| s.status == SectionStatus::Active)
        .find(|s| s.clashes_with(&section))
    {
        return Err(Error::Conflict(format!(
            "{} clashes with {}",
            section.label(),
            clash.label()
        )));
    }

    // Capacity check and insert in one statement so concurrent enrollments
    // cannot overfill the section
    let result = sqlx::query(
        "INSERT INTO enrollments (identity_id, section_id, created_at)
         SELECT ?, s.id, ? FROM sections s
         WHERE s.id = ?
           AND (SELECT COUNT(*) FROM enrollments WHERE section_id = s.id) < s.capacity",
    )
    .bind(identity_id)
    .bind(to_db_timestamp(now()))
    .bind(section_id)
    .execute(db)
    .await
    .map_err(Error::from)
    .map_err(|e| {
        if e.is_unique_violation() {
            Error::Conflict(format!(
                "identity {} is already enrolled in section {}",
                identity_id, section_id
            ))
        } else {
            e
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "section {} is full (capacity {})",
            section_id, section.capacity
        )));
    }

    info!(identity_id, section_id, "Enrolled");

    get_enrollment(db, identity_id, section_id)
        .await?
        .ok_or_else(|| Error::Internal("enrollment vanished after insert".to_string()))
}

pub async fn get_enrollment(db: &SqlitePool, identity_id: i64, section_id: i64) -> Result<Option<Enrollment>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM enrollments WHERE identity_id = ? AND section_id = ?",
        ENROLLMENT_COLUMNS
    ))
    .bind(identity_id)
    .bind(section_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(Enrollment::from_row).transpose()
}
