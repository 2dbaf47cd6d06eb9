//! Liveness and build identification

use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use ua_common::time::{now, parse_db_timestamp};

/// GET /health
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` while the database answers, `degraded` otherwise
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    /// Most recent scan from any reader; a stale value points at reader trouble
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan_at: Option<DateTime<Utc>>,
    /// Connected SSE clients
    pub event_subscribers: usize,
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub build_profile: &'static str,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let latest: Result<Option<String>, sqlx::Error> = sqlx::query_scalar("SELECT MAX(scanned_at) FROM scan_events")
        .fetch_one(&state.db)
        .await;

    let (status, last_scan_at) = match latest {
        Ok(raw) => ("ok", raw.as_deref().and_then(|ts| parse_db_timestamp(ts).ok())),
        Err(_) => ("degraded", None),
    };

    Json(HealthResponse {
        status,
        module: "ua-at",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (now() - state.startup_time).num_seconds().max(0),
        last_scan_at,
        event_subscribers: state.event_bus.subscriber_count(),
    })
}

/// GET /api/buildinfo
pub async fn get_build_info() -> Json<BuildInfo> {
    Json(BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        build_profile: env!("BUILD_PROFILE"),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/buildinfo", get(get_build_info))
}
