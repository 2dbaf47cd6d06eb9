//! Attendance listing and on-demand closing

use crate::attendance::{self, AttendanceFilter, AttendancePage};
use crate::closer::CloseReport;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use ua_common::time::now;

/// POST /api/close body; every field optional
#[derive(Debug, Default, Deserialize)]
pub struct CloseBody {
    /// Defaults to the configured closer grace
    pub grace_minutes: Option<i64>,
    /// Defaults to now
    pub at: Option<DateTime<Utc>>,
}

/// GET /api/attendance
pub async fn list_attendance(
    State(state): State<AppState>,
    Query(filter): Query<AttendanceFilter>,
) -> ApiResult<Json<AttendancePage>> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if to < from {
            return Err(ApiError::BadRequest("'to' is before 'from'".to_string()));
        }
    }
    Ok(Json(attendance::list(&state.db, &filter).await?))
}

/// POST /api/close
///
/// An empty body runs with defaults.
pub async fn close_sessions(
    State(state): State<AppState>,
    body: Result<Json<CloseBody>, JsonRejection>,
) -> ApiResult<Json<CloseReport>> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => CloseBody::default(),
        Err(e) => return Err(ApiError::BadRequest(e.body_text())),
    };

    let grace = body.grace_minutes.unwrap_or(state.config.closer_grace_minutes);
    if grace < 0 {
        return Err(ApiError::BadRequest("grace_minutes must not be negative".to_string()));
    }

    let report = state
        .closer
        .close_elapsed_sessions(body.at.unwrap_or_else(now), grace)
        .await?;
    Ok(Json(report))
}

/// Build attendance routes
pub fn attendance_routes() -> Router<AppState> {
    Router::new()
        .route("/api/attendance", get(list_attendance))
        .route("/api/close", post(close_sessions))
}
