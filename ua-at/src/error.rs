//! Error types for ua-at HTTP handlers

use crate::tags::TagError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Double binding refused (409); `detail` names the conflicting side
    #[error("Conflict: {message}")]
    TagConflict { message: String, detail: Value },

    /// Other refused writes (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Deadline exceeded (504)
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// ua-common error
    #[error("Common error: {0}")]
    Common(ua_common::Error),
}

impl From<ua_common::Error> for ApiError {
    fn from(err: ua_common::Error) -> Self {
        use ua_common::Error as E;
        match err {
            E::InvalidInput(msg) => ApiError::BadRequest(msg),
            E::NotFound(msg) => ApiError::NotFound(msg),
            E::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Common(other),
        }
    }
}

impl From<TagError> for ApiError {
    fn from(err: TagError) -> Self {
        let message = err.to_string();
        match err {
            TagError::UidOwnedByOther {
                uid,
                owner_id,
                owner_username,
            } => ApiError::TagConflict {
                message,
                detail: json!({
                    "kind": "uid_owned_by_other",
                    "uid": uid,
                    "assigned_to": owner_username,
                    "assigned_to_id": owner_id,
                }),
            },
            TagError::IdentityHasOtherUid {
                identity_id,
                current_uid,
            } => ApiError::TagConflict {
                message,
                detail: json!({
                    "kind": "identity_has_other_uid",
                    "identity_id": identity_id,
                    "current_uid": current_uid,
                }),
            },
            TagError::InvalidUid(_) => ApiError::BadRequest(message),
            TagError::UnknownIdentity(_) => ApiError::NotFound(message),
            TagError::Storage(e) => ApiError::from(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::TagConflict { message, detail } => {
                (StatusCode::CONFLICT, "TAG_CONFLICT", message, Some(detail))
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg, None),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
                None,
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
                None,
            ),
        };

        let mut error = json!({
            "code": error_code,
            "message": message,
        });
        if let (Some(detail), Some(obj)) = (detail, error.as_object_mut()) {
            obj.insert("conflict".to_string(), detail);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
