//! Session closer
//!
//! After a section's scheduled end plus a grace period, every enrolled
//! identity without a record for their day gets an unbacked ABSENT record.
//! Inserts are `ON CONFLICT DO NOTHING`, so re-runs, overlapping runs and
//! a race with a late scan all leave exactly one record per key.

use crate::attendance;
use crate::catalog;
use crate::models::DayBucket;
use crate::policy::PolicyEngine;
use crate::schedule::LocalMoment;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use ua_common::db::retry_on_lock;
use ua_common::time::to_db_date;
use ua_common::{EventBus, Result, UaEvent};

/// Absences inserted for one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionClose {
    pub section_id: i64,
    pub enrolled: usize,
    pub absences_marked: u64,
}

/// Summary of one closer run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseReport {
    /// Campus civil date of the run
    pub session_date: NaiveDate,
    pub absences_marked: u64,
    pub sections_closed: usize,
    pub sections: Vec<SectionClose>,
    /// Escalations triggered by the follow-up policy recompute
    pub escalations: usize,
}

/// Marks absences for elapsed sessions
#[derive(Clone)]
pub struct SessionCloser {
    db: SqlitePool,
    policy: PolicyEngine,
    event_bus: EventBus,
    campus_utc_offset_minutes: i32,
    max_lock_wait_ms: u64,
}

impl SessionCloser {
    pub fn new(
        db: SqlitePool,
        policy: PolicyEngine,
        event_bus: EventBus,
        campus_utc_offset_minutes: i32,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            policy,
            event_bus,
            campus_utc_offset_minutes,
            max_lock_wait_ms,
        }
    }

    /// Close every section whose end + grace has passed for its enrollees
    ///
    /// Each enrolled identity is judged in their own civil time, the same
    /// clock the resolver uses for their scans: the section closes for
    /// them once their local day is in its bucket and their local time is
    /// past end + grace. A section whose end + grace would pass midnight
    /// is never closed. `session_date` in the report is the campus date.
    pub async fn close_elapsed_sessions(&self, now: DateTime<Utc>, grace_minutes: i64) -> Result<CloseReport> {
        let campus = LocalMoment::at(now, self.campus_utc_offset_minutes);
        let grace = Duration::minutes(grace_minutes.max(0));

        let mut sections = Vec::new();
        for bucket in DayBucket::ALL {
            sections.extend(catalog::sections_for_bucket(&self.db, bucket).await?);
        }

        let mut report = CloseReport {
            session_date: campus.date,
            absences_marked: 0,
            sections_closed: 0,
            sections: Vec::new(),
            escalations: 0,
        };
        let mut newly_absent: Vec<(i64, i64)> = Vec::new();

        for section in sections {
            let (cutoff, wrapped) = section.end_time.overflowing_add_signed(grace);
            if wrapped != 0 {
                debug!(section_id = section.id, "Grace period passes midnight; not closing");
                continue;
            }

            let enrolled = catalog::enrolled_identities(&self.db, section.id).await?;
            let due: Vec<(i64, NaiveDate)> = enrolled
                .iter()
                .filter_map(|identity| {
                    let local = LocalMoment::at(now, identity.utc_offset_minutes);
                    (local.bucket == section.day_bucket && cutoff <= local.time).then_some((identity.id, local.date))
                })
                .collect();
            if due.is_empty() {
                continue;
            }

            let marked = retry_on_lock("closer_mark_absent", self.max_lock_wait_ms, || {
                mark_absent(&self.db, section.id, &due)
            })
            .await?;

            let mut per_date: BTreeMap<NaiveDate, u64> = BTreeMap::new();
            for (_, date) in &marked {
                *per_date.entry(*date).or_default() += 1;
            }
            for (date, count) in per_date {
                info!(
                    section_id = section.id,
                    session_date = %date,
                    enrolled = enrolled.len(),
                    absences_marked = count,
                    "Absences marked"
                );
                self.event_bus.emit_lossy(UaEvent::AbsencesMarked {
                    section_id: section.id,
                    session_date: to_db_date(date),
                    count,
                    timestamp: now,
                });
            }

            let count = marked.len() as u64;
            newly_absent.extend(marked.into_iter().map(|(identity_id, _)| (identity_id, section.id)));
            report.absences_marked += count;
            report.sections_closed += 1;
            report.sections.push(SectionClose {
                section_id: section.id,
                enrolled: enrolled.len(),
                absences_marked: count,
            });
        }

        // Follow-up recompute is best effort and never changes the count
        for (identity_id, section_id) in newly_absent {
            match self.policy.recompute(identity_id, section_id).await {
                Ok(outcome) if outcome.escalation.is_some() => report.escalations += 1,
                Ok(_) => {}
                Err(e) => warn!(identity_id, section_id, "Policy recompute after close failed: {}", e),
            }
        }

        info!(
            session_date = %report.session_date,
            sections_closed = report.sections_closed,
            absences_marked = report.absences_marked,
            escalations = report.escalations,
            "Closer run complete"
        );

        Ok(report)
    }
}

/// Insert absences for one section in one transaction; returns who got one
async fn mark_absent(db: &SqlitePool, section_id: i64, due: &[(i64, NaiveDate)]) -> Result<Vec<(i64, NaiveDate)>> {
    let mut tx = db.begin().await?;
    let mut marked = Vec::new();

    for &(identity_id, session_date) in due {
        if attendance::insert_absence(&mut *tx, identity_id, section_id, session_date).await? {
            marked.push((identity_id, session_date));
        }
    }

    tx.commit().await?;
    Ok(marked)
}
