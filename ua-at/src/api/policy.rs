//! Policy snapshot endpoint

use crate::policy::PolicyOutcome;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::time::Duration;

/// GET /api/policy/:identity_id/:section_id
///
/// Recomputes the enrollment's policy state, persisting any escalation.
pub async fn get_policy(
    State(state): State<AppState>,
    Path((identity_id, section_id)): Path<(i64, i64)>,
) -> ApiResult<Json<PolicyOutcome>> {
    let budget = Duration::from_millis(state.config.policy_timeout_ms);
    let outcome = tokio::time::timeout(budget, state.policy.recompute(identity_id, section_id))
        .await
        .map_err(|_| ApiError::Timeout(format!("policy recompute exceeded {} ms", state.config.policy_timeout_ms)))??;
    Ok(Json(outcome))
}

/// Build policy routes
pub fn policy_routes() -> Router<AppState> {
    Router::new().route("/api/policy/:identity_id/:section_id", get(get_policy))
}
