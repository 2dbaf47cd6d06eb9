//! Tag assignment and triage endpoints

use crate::models::{IdentityRef, Tag};
use crate::tags::{self, TagBinding};
use crate::{users, ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Default size of the unassigned pick-list
pub const DEFAULT_UNASSIGNED_LIMIT: u32 = 20;

/// Largest pick-list a caller may request
pub const MAX_UNASSIGNED_LIMIT: u32 = 200;

/// POST /api/tags/assign body
#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub uid: Option<String>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct AssignResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub binding: TagBinding,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnassignedQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UnassignedResponse {
    pub uids: Vec<String>,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct TagResponse {
    #[serde(flatten)]
    pub tag: Tag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_username: Option<String>,
}

/// POST /api/tags/assign
pub async fn assign_tag(
    State(state): State<AppState>,
    body: Result<Json<AssignBody>, JsonRejection>,
) -> ApiResult<Json<AssignResponse>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let uid = body
        .uid
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing uid".to_string()))?;

    let identity = match (body.user_id, body.username.filter(|u| !u.trim().is_empty())) {
        (Some(id), _) => IdentityRef::Id(id),
        (None, Some(username)) => IdentityRef::Username(username),
        (None, None) => return Err(ApiError::BadRequest("Provide username or user_id".to_string())),
    };

    let binding = tags::assign(&state.db, &uid, &identity, body.force, state.config.max_lock_wait_ms).await?;
    Ok(Json(AssignResponse { ok: true, binding }))
}

/// GET /api/tags/unassigned?limit=N
pub async fn list_unassigned(
    State(state): State<AppState>,
    Query(query): Query<UnassignedQuery>,
) -> ApiResult<Json<UnassignedResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_UNASSIGNED_LIMIT)
        .clamp(1, MAX_UNASSIGNED_LIMIT);
    let uids = tags::recent_unassigned_uids(&state.db, limit).await?;
    Ok(Json(UnassignedResponse { uids, limit }))
}

/// GET /api/tags/:uid
pub async fn get_tag(State(state): State<AppState>, Path(uid): Path<String>) -> ApiResult<Json<TagResponse>> {
    let tag = tags::get_tag(&state.db, &uid)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("tag {}", uid)))?;

    let owner_username = match tag.owner_id {
        Some(owner_id) => users::get_identity(&state.db, owner_id).await?.map(|i| i.username),
        None => None,
    };

    Ok(Json(TagResponse { tag, owner_username }))
}

#[derive(Debug, Serialize)]
pub struct UnassignResponse {
    pub ok: bool,
    pub uid: String,
}

/// DELETE /api/tags/:uid
///
/// Releases the tag from its owner; 404 when it had none.
pub async fn unassign_tag(State(state): State<AppState>, Path(uid): Path<String>) -> ApiResult<Json<UnassignResponse>> {
    if !tags::unassign(&state.db, &uid).await? {
        return Err(ApiError::NotFound(format!("no owner for tag {}", uid)));
    }
    Ok(Json(UnassignResponse { ok: true, uid }))
}

/// Build tag routes
pub fn tag_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tags/assign", post(assign_tag))
        .route("/api/tags/unassigned", get(list_unassigned))
        .route("/api/tags/:uid", get(get_tag).delete(unassign_tag))
}
