//! Scan ingestion endpoint

use crate::ingest::{self, ScanRequest, ScanResult};
use crate::models::{ScanEvent, StatusHint};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;

/// POST /api/scan body
#[derive(Debug, Deserialize)]
pub struct ScanBody {
    pub uid: Option<String>,
    pub device_id: Option<String>,
    /// Reader clock; receipt time when absent
    pub timestamp: Option<DateTime<Utc>>,
    /// Advisory `IN` / `OUT` / `SCAN`
    pub status: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    /// `reader` for the minimal LCD response
    pub view: Option<String>,
}

/// Largest audit page a caller may request
pub const MAX_SCAN_LIMIT: u32 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct ScanLogQuery {
    pub uid: Option<String>,
    pub limit: Option<u32>,
}

/// Minimal response for hardware readers
#[derive(Debug, Serialize)]
pub struct ReaderResponse {
    pub ok: bool,
    pub lcd_line1: String,
    pub lcd_line2: String,
}

/// Full response for admin tools
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub ok: bool,
    pub lcd_line1: String,
    pub lcd_line2: String,
    pub note: String,
    #[serde(flatten)]
    pub result: ScanResult,
}

impl ScanResponse {
    fn from_result(result: ScanResult) -> Self {
        let (lcd_line1, lcd_line2) = result.lcd_lines();
        Self {
            ok: result.ok(),
            lcd_line1,
            lcd_line2,
            note: result.note(),
            result,
        }
    }
}

/// POST /api/scan
pub async fn post_scan(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<ScanBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let uid = body.uid.unwrap_or_default();
    if uid.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing uid".to_string()));
    }

    let request = ScanRequest {
        uid,
        device_id: body.device_id,
        scanned_at: body.timestamp,
        source_addr: source_addr(&headers, connect_info.as_ref()),
        status_hint: body.status.as_deref().map(StatusHint::parse_lenient).unwrap_or_default(),
        metadata: body.metadata,
    };

    let result = state.ingestor.ingest(request).await?;
    let response = ScanResponse::from_result(result);

    let value = if query.view.as_deref() == Some("reader") {
        serde_json::to_value(ReaderResponse {
            ok: response.ok,
            lcd_line1: response.lcd_line1,
            lcd_line2: response.lcd_line2,
        })
    } else {
        serde_json::to_value(&response)
    }
    .map_err(|e| ApiError::Internal(format!("Serialize scan response: {}", e)))?;

    Ok(Json(value))
}

/// GET /api/scans?uid=&limit=
///
/// Audit trail, newest first.
pub async fn list_scans(
    State(state): State<AppState>,
    Query(query): Query<ScanLogQuery>,
) -> ApiResult<Json<Vec<ScanEvent>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, MAX_SCAN_LIMIT);
    let events = ingest::recent_scan_events(&state.db, query.uid.as_deref(), limit).await?;
    Ok(Json(events))
}

/// First `X-Forwarded-For` hop, else the peer address
fn source_addr(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

/// Build scan routes
pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/scan", post(post_scan))
        .route("/api/scans", get(list_scans))
}
