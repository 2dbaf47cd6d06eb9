//! ua-at library: attendance resolution and policy engine
//!
//! Turns badge scans into per-day attendance records, keeps cumulative
//! absence policy per enrollment, and closes elapsed sessions with
//! explicit absences. Exposed over HTTP by the `ua-at` binary and run as
//! a batch by `ua-close`.

pub mod api;
pub mod attendance;
pub mod catalog;
pub mod closer;
pub mod config;
pub mod enrollments;
pub mod error;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod pagination;
pub mod policy;
pub mod registration;
pub mod schedule;
pub mod tags;
pub mod users;

pub use crate::error::{ApiError, ApiResult};

use crate::closer::SessionCloser;
use crate::config::EngineConfig;
use crate::ingest::ScanIngestor;
use crate::notify::NotificationSink;
use crate::policy::{PolicyEngine, PolicyParams};
use crate::registration::RegistrationGate;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use ua_common::EventBus;

/// Capacity of the domain event channel
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: EngineConfig,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub ingestor: ScanIngestor,
    pub policy: PolicyEngine,
    pub closer: SessionCloser,
    pub gate: RegistrationGate,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the engine components over one pool and event bus
    pub fn new(db: SqlitePool, config: EngineConfig, sink: Arc<dyn NotificationSink>, event_bus: EventBus) -> Self {
        let params = PolicyParams {
            late_per_absence: config.late_per_absence,
            semester_weeks: config.semester_weeks,
        };
        let policy = PolicyEngine::new(db.clone(), params, sink, event_bus.clone(), config.max_lock_wait_ms);
        let ingestor = ScanIngestor::new(db.clone(), config.clone(), policy.clone(), event_bus.clone());
        let closer = SessionCloser::new(
            db.clone(),
            policy.clone(),
            event_bus.clone(),
            config.campus_utc_offset_minutes,
            config.max_lock_wait_ms,
        );
        let gate = RegistrationGate::new(db.clone());

        Self {
            db,
            config,
            event_bus,
            ingestor,
            policy,
            closer,
            gate,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::scan_routes())
        .merge(api::tag_routes())
        .merge(api::attendance_routes())
        .merge(api::policy_routes())
        .merge(api::registration_routes())
        .route("/api/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
