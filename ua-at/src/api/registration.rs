//! Registration gate endpoints

use crate::registration::{GateOverride, GateState};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use ua_common::time::now;

#[derive(Debug, Default, Deserialize)]
pub struct GateQuery {
    /// Date to evaluate; today (UTC) by default
    pub date: Option<NaiveDate>,
}

/// PUT /api/registration body
#[derive(Debug, Deserialize)]
pub struct GateBody {
    /// `open`, `closed`, or `clear`
    #[serde(rename = "override")]
    pub override_state: String,
}

/// GET /api/registration
pub async fn get_registration(
    State(state): State<AppState>,
    Query(query): Query<GateQuery>,
) -> ApiResult<Json<GateState>> {
    let date = query.date.unwrap_or_else(|| now().date_naive());
    Ok(Json(state.gate.state_on(date).await?))
}

/// PUT /api/registration
pub async fn put_registration(
    State(state): State<AppState>,
    body: Result<Json<GateBody>, JsonRejection>,
) -> ApiResult<Json<GateState>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let override_state = match body.override_state.trim().to_ascii_lowercase().as_str() {
        "clear" | "" => None,
        raw => Some(GateOverride::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("override must be open, closed or clear, got '{}'", raw))
        })?),
    };

    state.gate.set_override(override_state).await?;
    info!(override_state = ?override_state, "Registration override changed");

    Ok(Json(state.gate.state_on(now().date_naive()).await?))
}

/// Build registration routes
pub fn registration_routes() -> Router<AppState> {
    Router::new().route("/api/registration", get(get_registration).put(put_registration))
}
