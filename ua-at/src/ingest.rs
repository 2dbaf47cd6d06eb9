//! Scan ingestion
//!
//! Pipeline for one badge presentation:
//!
//! 1. Normalize the uid; an empty uid is rejected before anything is written
//! 2. Resolve the tag owner and their enrolled running section, or any
//!    running section for diagnostics
//! 3. Append the immutable scan event (the only step whose failure fails
//!    the call)
//! 4. Classify: unknown tag, no active class, not enrolled, or record
//!    attendance and recompute policy
//!
//! Everything after step 3 runs under the scan timeout; the policy
//! recompute additionally runs under its own, shorter timeout. Failures
//! after the append degrade the outcome instead of failing the call.

use crate::attendance::{self, ScanApplied, ScanTouch};
use crate::config::EngineConfig;
use crate::models::{AttendanceRecord, Identity, ScanEvent, SessionSeries, StatusHint};
use crate::policy::{PolicyEngine, PolicyOutcome};
use crate::schedule::{self, LocalMoment};
use crate::tags;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use ua_common::db::retry_on_lock;
use ua_common::time::{now, to_db_timestamp};
use ua_common::{Error, EventBus, Result, UaEvent};

/// A raw scan as received from a reader
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub uid: String,
    pub device_id: Option<String>,
    /// Defaults to receipt time
    pub scanned_at: Option<DateTime<Utc>>,
    pub source_addr: Option<String>,
    pub status_hint: StatusHint,
    /// Free-form reader metadata, stored with the scan event
    pub metadata: Option<serde_json::Value>,
}

/// Local-time context reported when nothing was recorded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanDiagnostics {
    pub local: LocalMoment,
    /// Active sections running right now, enrollment ignored
    pub sections_running: usize,
}

/// What a scan amounted to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    UnknownTag,
    NoActiveClass {
        identity: Identity,
        diagnostics: ScanDiagnostics,
    },
    NotEnrolled {
        identity: Identity,
        section: SessionSeries,
        diagnostics: ScanDiagnostics,
    },
    Recorded {
        identity: Identity,
        section: SessionSeries,
        record: AttendanceRecord,
        created: bool,
        /// This scan advanced `last_seen`
        advanced: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        policy: Option<PolicyOutcome>,
        /// Set when the policy step failed or timed out
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    /// Scan logged, attendance not (fully) applied
    Degraded {
        #[serde(skip_serializing_if = "Option::is_none")]
        identity: Option<Identity>,
        note: String,
    },
}

impl ScanOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanOutcome::UnknownTag => "unknown_tag",
            ScanOutcome::NoActiveClass { .. } => "no_active_class",
            ScanOutcome::NotEnrolled { .. } => "not_enrolled",
            ScanOutcome::Recorded { .. } => "recorded",
            ScanOutcome::Degraded { .. } => "degraded",
        }
    }
}

/// Scan outcome plus the audit identifiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub scan_id: i64,
    pub uid: String,
    pub scanned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(flatten)]
    pub outcome: ScanOutcome,
}

impl ScanResult {
    /// Reader-facing success flag: attendance was recorded
    pub fn ok(&self) -> bool {
        matches!(self.outcome, ScanOutcome::Recorded { .. })
    }

    /// Two short lines for a reader's LCD
    pub fn lcd_lines(&self) -> (String, String) {
        match &self.outcome {
            ScanOutcome::UnknownTag => ("Unknown tag".into(), "Assign in portal".into()),
            ScanOutcome::NoActiveClass { identity, .. } => {
                (format!("Hi {}", identity.display_label()), "No class now".into())
            }
            ScanOutcome::NotEnrolled { identity, .. } => {
                (format!("Hi {}", identity.display_label()), "Not enrolled".into())
            }
            ScanOutcome::Recorded { identity, record, .. } => (
                format!("Welcome {}", identity.display_label()),
                record.status.title().into(),
            ),
            ScanOutcome::Degraded { identity: Some(identity), .. } => {
                (format!("Hi {}", identity.display_label()), "Scan logged".into())
            }
            ScanOutcome::Degraded { identity: None, .. } => ("Scan logged".into(), "Try again".into()),
        }
    }

    /// Human-readable summary for admin views
    pub fn note(&self) -> String {
        match &self.outcome {
            ScanOutcome::UnknownTag => "Unknown or unassigned tag".into(),
            ScanOutcome::NoActiveClass { .. } => "No active class now".into(),
            ScanOutcome::NotEnrolled { .. } => "Not enrolled in this class".into(),
            ScanOutcome::Recorded { created: true, record, .. } => format!("Marked {}", record.status.title().to_lowercase()),
            ScanOutcome::Recorded { advanced: true, .. } => "Updated".into(),
            ScanOutcome::Recorded { .. } => "Repeat scan within cooldown".into(),
            ScanOutcome::Degraded { note, .. } => note.clone(),
        }
    }
}

/// Turns raw scans into audit events and attendance
#[derive(Clone)]
pub struct ScanIngestor {
    db: SqlitePool,
    config: EngineConfig,
    policy: PolicyEngine,
    event_bus: EventBus,
}

impl ScanIngestor {
    pub fn new(db: SqlitePool, config: EngineConfig, policy: PolicyEngine, event_bus: EventBus) -> Self {
        Self {
            db,
            config,
            policy,
            event_bus,
        }
    }

    /// Ingest one scan
    ///
    /// `Err` only for an empty uid (`InvalidInput`) or a failed audit append.
    pub async fn ingest(&self, request: ScanRequest) -> Result<ScanResult> {
        let uid = tags::normalize_uid(&request.uid)
            .ok_or_else(|| Error::InvalidInput("Missing uid".to_string()))?;
        let scanned_at = request.scanned_at.unwrap_or_else(now);
        let device_id = request
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        // Resolution failures are not fatal: the scan is still logged
        let mut resolution_error = None;
        let identity = match tags::resolve(&self.db, &uid).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(uid = %uid, "Tag resolution failed: {}", e);
                resolution_error = Some(format!("tag resolution failed: {}", e));
                None
            }
        };

        let session = match &identity {
            Some(identity) => match schedule::find_active_session(&self.db, identity, scanned_at).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(uid = %uid, identity_id = identity.id, "Session resolution failed: {}", e);
                    resolution_error = Some(format!("session resolution failed: {}", e));
                    None
                }
            },
            None => None,
        };

        // Without an enrolled session, any running section is kept for the
        // audit row and the not-enrolled diagnostics
        let running = match (&identity, &session) {
            (Some(identity), None) if resolution_error.is_none() => {
                let moment = LocalMoment::at(scanned_at, identity.utc_offset_minutes);
                match schedule::sections_running_at(&self.db, &moment).await {
                    Ok(running) => running,
                    Err(e) => {
                        warn!(uid = %uid, identity_id = identity.id, "Running section lookup failed: {}", e);
                        resolution_error = Some(format!("session resolution failed: {}", e));
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        let audit_section = session.as_ref().or_else(|| running.first());
        let scan_id = self
            .append_scan_event(&uid, &request, device_id.as_deref(), scanned_at, identity.as_ref(), audit_section)
            .await?;

        match tags::register_seen(&self.db, &uid, scanned_at).await {
            Ok(true) => info!(uid = %uid, "New tag seen"),
            Ok(false) => {}
            Err(e) => warn!(uid = %uid, "Tag registration failed: {}", e),
        }

        let outcome = match (identity, resolution_error) {
            (identity, Some(error)) => ScanOutcome::Degraded {
                identity,
                note: format!("Scan logged; {}", error),
            },
            (None, None) => ScanOutcome::UnknownTag,
            (Some(identity), None) => {
                let budget = Duration::from_millis(self.config.scan_timeout_ms);
                match tokio::time::timeout(budget, self.classify(identity.clone(), session, running, scanned_at, device_id.as_deref(), scan_id)).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        warn!(uid = %uid, scan_id, identity_id = identity.id, "Attendance not applied: {}", e);
                        ScanOutcome::Degraded {
                            identity: Some(identity),
                            note: format!("Scan logged; attendance error: {}", e),
                        }
                    }
                    Err(_) => {
                        warn!(uid = %uid, scan_id, identity_id = identity.id, timeout_ms = self.config.scan_timeout_ms, "Attendance timed out");
                        ScanOutcome::Degraded {
                            identity: Some(identity),
                            note: "Scan logged; attendance timed out".to_string(),
                        }
                    }
                }
            }
        };

        let (identity_id, section_id) = match &outcome {
            ScanOutcome::NoActiveClass { identity, .. } => (Some(identity.id), None),
            ScanOutcome::NotEnrolled { identity, section, .. }
            | ScanOutcome::Recorded { identity, section, .. } => (Some(identity.id), Some(section.id)),
            ScanOutcome::Degraded { identity, .. } => (identity.as_ref().map(|i| i.id), None),
            ScanOutcome::UnknownTag => (None, None),
        };

        debug!(uid = %uid, scan_id, outcome = outcome.kind(), "Scan processed");

        self.event_bus.emit_lossy(UaEvent::ScanRecorded {
            scan_id,
            uid: uid.clone(),
            identity_id,
            section_id,
            outcome: outcome.kind().to_string(),
            timestamp: scanned_at,
        });

        Ok(ScanResult {
            scan_id,
            uid,
            scanned_at,
            device_id,
            outcome,
        })
    }

    /// Steps after the audit append for a known identity
    async fn classify(
        &self,
        identity: Identity,
        session: Option<SessionSeries>,
        running: Vec<SessionSeries>,
        scanned_at: DateTime<Utc>,
        device_id: Option<&str>,
        scan_id: i64,
    ) -> Result<ScanOutcome> {
        let moment = LocalMoment::at(scanned_at, identity.utc_offset_minutes);

        let Some(section) = session else {
            let diagnostics = ScanDiagnostics {
                local: moment,
                sections_running: running.len(),
            };

            return Ok(match running.into_iter().next() {
                Some(section) => {
                    info!(
                        target: "ua_at::diagnostics",
                        scan_id,
                        identity_id = identity.id,
                        section_id = section.id,
                        device_id = device_id.unwrap_or(""),
                        local_time = %moment.time,
                        "Scan by identity not enrolled in running section"
                    );
                    ScanOutcome::NotEnrolled {
                        identity,
                        section,
                        diagnostics,
                    }
                }
                None => ScanOutcome::NoActiveClass { identity, diagnostics },
            });
        };

        let touch = ScanTouch {
            identity_id: identity.id,
            section: &section,
            session_date: moment.date,
            utc_offset_minutes: identity.utc_offset_minutes,
            scanned_at,
            device_id,
            scan_id,
        };

        let ScanApplied {
            record,
            created,
            advanced,
        } = retry_on_lock("attendance_record_scan", self.config.max_lock_wait_ms, || {
            attendance::record_scan(
                &self.db,
                &touch,
                self.config.late_threshold_minutes,
                self.config.cooldown_seconds,
            )
        })
        .await?;

        if created {
            info!(
                scan_id,
                identity_id = identity.id,
                section_id = section.id,
                status = record.status.as_str(),
                "Attendance recorded"
            );
        }

        let policy_budget = Duration::from_millis(self.config.policy_timeout_ms);
        let (policy, warning) =
            match tokio::time::timeout(policy_budget, self.policy.recompute(identity.id, section.id)).await {
                Ok(Ok(outcome)) => (Some(outcome), None),
                Ok(Err(e)) => {
                    warn!(identity_id = identity.id, section_id = section.id, "Policy recompute failed: {}", e);
                    (None, Some(format!("policy recompute failed: {}", e)))
                }
                Err(_) => {
                    warn!(
                        identity_id = identity.id,
                        section_id = section.id,
                        timeout_ms = self.config.policy_timeout_ms,
                        "Policy recompute timed out"
                    );
                    (None, Some("policy recompute timed out".to_string()))
                }
            };

        Ok(ScanOutcome::Recorded {
            identity,
            section,
            record,
            created,
            advanced,
            policy,
            warning,
        })
    }

    async fn append_scan_event(
        &self,
        uid: &str,
        request: &ScanRequest,
        device_id: Option<&str>,
        scanned_at: DateTime<Utc>,
        identity: Option<&Identity>,
        section: Option<&SessionSeries>,
    ) -> Result<i64> {
        let metadata = request
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}))
            .to_string();
        let scanned_at = to_db_timestamp(scanned_at);

        let scan_id = retry_on_lock("scan_event_append", self.config.max_lock_wait_ms, || async {
            let result = sqlx::query(
                "INSERT INTO scan_events
                    (uid, device_id, source_addr, status_hint, scanned_at, identity_id, section_id, metadata)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(uid)
            .bind(device_id)
            .bind(request.source_addr.as_deref())
            .bind(request.status_hint.as_str())
            .bind(&scanned_at)
            .bind(identity.map(|i| i.id))
            .bind(section.map(|s| s.id))
            .bind(&metadata)
            .execute(&self.db)
            .await?;
            Ok::<_, Error>(result.last_insert_rowid())
        })
        .await
        .map_err(|e| {
            error!(uid = %uid, "Scan event append failed: {}", e);
            e
        })?;

        Ok(scan_id)
    }
}

/// Most recent scan events first, optionally for one uid
pub async fn recent_scan_events(db: &SqlitePool, uid: Option<&str>, limit: u32) -> Result<Vec<ScanEvent>> {
    let uid = uid.and_then(tags::normalize_uid);
    let rows = sqlx::query(
        "SELECT id, uid, device_id, source_addr, status_hint, scanned_at, identity_id, section_id, metadata
         FROM scan_events
         WHERE ?1 IS NULL OR uid = ?1
         ORDER BY id DESC
         LIMIT ?2",
    )
    .bind(uid)
    .bind(i64::from(limit))
    .fetch_all(db)
    .await?;

    rows.iter().map(ScanEvent::from_row).collect()
}
