//! Attendance policy engine
//!
//! Cumulative absence accounting per enrollment:
//!
//! ```text
//! late_as_absence    = floor(late / L)
//! absence_equivalent = absent + late_as_absence
//! planned            = weekly_meetings(bucket) * semester_weeks
//! fraction           = absence_equivalent / max(planned, 1)
//! level              = 3 if fraction >= 0.75, 2 if >= 0.50, 1 if >= 0.25, else 0
//! ```
//!
//! The stored warning level only ever rises. Escalation is a single
//! conditional UPDATE (`WHERE warning_level < new`), so concurrent
//! recomputes for the same enrollment escalate, and notify, once per level.
//!
//! A recompute runs on its own task. Callers may stop waiting for it, but
//! a level that reaches the database is always followed by its
//! notification and `WarningEscalated` event.

use crate::attendance::{self, AttendanceCounts};
use crate::catalog;
use crate::enrollments;
use crate::models::{DayBucket, Identity, SessionSeries};
use crate::notify::NotificationSink;
use crate::users;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use ua_common::db::retry_on_lock;
use ua_common::time::now;
use ua_common::{Error, EventBus, Result, UaEvent};

/// Highest warning level; reaching it fails the enrollment
pub const MAX_WARNING_LEVEL: u8 = 3;

/// Policy constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyParams {
    /// LATE records per absence equivalent (L)
    pub late_per_absence: u32,
    pub semester_weeks: u32,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            late_per_absence: 4,
            semester_weeks: 16,
        }
    }
}

/// Instantaneous policy view of one enrollment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyState {
    pub present_count: u32,
    pub late_count: u32,
    pub absent_count: u32,
    pub late_as_absence_count: u32,
    pub absence_equivalent: u32,
    pub planned_sessions: u32,
    pub absence_fraction: f64,
    /// `absence_fraction` as a percentage, one decimal
    pub absence_percent: f64,
    pub level: u8,
}

impl PolicyState {
    pub fn compute(counts: AttendanceCounts, bucket: DayBucket, params: PolicyParams) -> Self {
        let late_as_absence_count = counts.late / params.late_per_absence.max(1);
        let absence_equivalent = counts.absent + late_as_absence_count;
        let planned_sessions = bucket.weekly_meetings() * params.semester_weeks;
        let absence_fraction = f64::from(absence_equivalent) / f64::from(planned_sessions.max(1));

        Self {
            present_count: counts.present,
            late_count: counts.late,
            absent_count: counts.absent,
            late_as_absence_count,
            absence_equivalent,
            planned_sessions,
            absence_fraction,
            absence_percent: (absence_fraction * 1000.0).round() / 10.0,
            level: level_for(absence_equivalent, planned_sessions),
        }
    }
}

/// Warning level for `absence_equivalent / max(planned, 1)`
///
/// Thresholds are compared in integers so that exactly 25%, 50% and 75%
/// reach the level.
pub fn level_for(absence_equivalent: u32, planned_sessions: u32) -> u8 {
    let equiv = u64::from(absence_equivalent);
    let planned = u64::from(planned_sessions.max(1));

    if 4 * equiv >= 3 * planned {
        3
    } else if 2 * equiv >= planned {
        2
    } else if 4 * equiv >= planned {
        1
    } else {
        0
    }
}

/// A persisted level change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Escalation {
    pub previous_level: u8,
    pub new_level: u8,
    pub failed: bool,
}

/// Result of one recompute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyOutcome {
    pub state: PolicyState,
    /// Stored level after this recompute
    pub warning_level: u8,
    pub failed_due_to_attendance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    /// A notification was delivered for the escalation
    pub notified: bool,
}

/// Recomputes policy state and persists escalations
#[derive(Clone)]
pub struct PolicyEngine {
    db: SqlitePool,
    params: PolicyParams,
    sink: Arc<dyn NotificationSink>,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl PolicyEngine {
    pub fn new(
        db: SqlitePool,
        params: PolicyParams,
        sink: Arc<dyn NotificationSink>,
        event_bus: EventBus,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            params,
            sink,
            event_bus,
            max_lock_wait_ms,
        }
    }

    /// Snapshot without persisting anything
    pub async fn evaluate(&self, identity_id: i64, section_id: i64) -> Result<PolicyState> {
        let section = self.section(section_id).await?;
        let counts = attendance::counts_for(&self.db, identity_id, section_id).await?;
        Ok(PolicyState::compute(counts, section.day_bucket, self.params))
    }

    /// Recompute, escalate if the level rose, notify once per escalation
    ///
    /// Notification failures are logged and reported as `notified: false`.
    pub async fn recompute(&self, identity_id: i64, section_id: i64) -> Result<PolicyOutcome> {
        let engine = self.clone();
        tokio::spawn(async move { engine.recompute_detached(identity_id, section_id).await })
            .await
            .map_err(|e| Error::Internal(format!("policy recompute task failed: {}", e)))?
    }

    async fn recompute_detached(&self, identity_id: i64, section_id: i64) -> Result<PolicyOutcome> {
        let section = self.section(section_id).await?;
        let enrollment = enrollments::get_enrollment(&self.db, identity_id, section_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("identity {} is not enrolled in section {}", identity_id, section_id))
            })?;

        let counts = attendance::counts_for(&self.db, identity_id, section_id).await?;
        let state = PolicyState::compute(counts, section.day_bucket, self.params);

        if state.level <= enrollment.warning_level {
            return Ok(PolicyOutcome {
                state,
                warning_level: enrollment.warning_level,
                failed_due_to_attendance: enrollment.failed_due_to_attendance,
                escalation: None,
                notified: false,
            });
        }

        let escalated = self.escalate(enrollment.id, state.level).await?;
        if !escalated {
            // A concurrent recompute already reached this level and notified
            let current = enrollments::get_enrollment(&self.db, identity_id, section_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("enrollment {}", enrollment.id)))?;
            return Ok(PolicyOutcome {
                state,
                warning_level: current.warning_level,
                failed_due_to_attendance: current.failed_due_to_attendance,
                escalation: None,
                notified: false,
            });
        }

        let escalation = Escalation {
            previous_level: enrollment.warning_level,
            new_level: state.level,
            failed: state.level >= MAX_WARNING_LEVEL || enrollment.failed_due_to_attendance,
        };

        info!(
            identity_id,
            section_id,
            previous_level = escalation.previous_level,
            new_level = escalation.new_level,
            absence_equivalent = state.absence_equivalent,
            planned_sessions = state.planned_sessions,
            "Warning level escalated"
        );

        let notified = self.notify(identity_id, &section, &state, &escalation).await;

        self.event_bus.emit_lossy(UaEvent::WarningEscalated {
            identity_id,
            section_id,
            previous_level: escalation.previous_level,
            new_level: escalation.new_level,
            failed: escalation.failed,
            timestamp: now(),
        });

        Ok(PolicyOutcome {
            state,
            warning_level: escalation.new_level,
            failed_due_to_attendance: escalation.failed,
            escalation: Some(escalation),
            notified,
        })
    }

    async fn section(&self, section_id: i64) -> Result<SessionSeries> {
        catalog::get_section(&self.db, section_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("section {}", section_id)))
    }

    /// Raise the stored level; false if it was already at or above `level`
    async fn escalate(&self, enrollment_id: i64, level: u8) -> Result<bool> {
        let db = &self.db;
        retry_on_lock("policy_escalate", self.max_lock_wait_ms, || async move {
            let result = sqlx::query(
                "UPDATE enrollments
                 SET warning_level = ?,
                     failed_due_to_attendance = CASE WHEN ? >= ? THEN 1 ELSE failed_due_to_attendance END
                 WHERE id = ? AND warning_level < ?",
            )
            .bind(i64::from(level))
            .bind(i64::from(level))
            .bind(i64::from(MAX_WARNING_LEVEL))
            .bind(enrollment_id)
            .bind(i64::from(level))
            .execute(db)
            .await?;
            Ok::<_, Error>(result.rows_affected() == 1)
        })
        .await
    }

    async fn notify(&self, identity_id: i64, section: &SessionSeries, state: &PolicyState, escalation: &Escalation) -> bool {
        let identity = match users::get_identity(&self.db, identity_id).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                warn!(identity_id, "Escalated identity not found; notification skipped");
                return false;
            }
            Err(e) => {
                warn!(identity_id, "Identity lookup failed; notification skipped: {}", e);
                return false;
            }
        };

        let (subject, body) = escalation_message(&identity, section, state, escalation);
        match self.sink.send(&identity, &subject, &body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(identity_id, section_id = section.id, "Notification failed: {}", e);
                false
            }
        }
    }
}

fn escalation_message(
    identity: &Identity,
    section: &SessionSeries,
    state: &PolicyState,
    escalation: &Escalation,
) -> (String, String) {
    let course = format!("{} {}", section.course_code, section.class_name);
    if escalation.failed {
        (
            format!("Failed due to attendance: {}", course),
            format!(
                "Dear {}, your absences in {} reached {}% ({} of {} planned sessions). \
                 You have failed this course due to attendance.",
                identity.display_label(),
                course,
                state.absence_percent,
                state.absence_equivalent,
                state.planned_sessions
            ),
        )
    } else {
        (
            format!("Attendance warning {}: {}", escalation.new_level, course),
            format!(
                "Dear {}, your absences in {} reached {}% ({} of {} planned sessions, \
                 {} late arrivals counted as {} absences). This is warning level {}.",
                identity.display_label(),
                course,
                state.absence_percent,
                state.absence_equivalent,
                state.planned_sessions,
                state.late_count,
                state.late_as_absence_count,
                escalation.new_level
            ),
        )
    }
}
