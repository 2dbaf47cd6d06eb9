//! HTTP surface: status codes, response shapes, error bodies

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use ua_at::build_router;

async fn send(env: &TestEnv, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(env.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_ok() {
    let env = test_env().await;
    let (status, body) = send(&env, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "ua-at");
}

#[tokio::test]
async fn test_buildinfo_has_version() {
    let env = test_env().await;
    let (status, body) = send(&env, get("/api/buildinfo")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["git_hash"].is_string());
}

#[tokio::test]
async fn test_scan_without_uid_is_bad_request() {
    let env = test_env().await;
    let (status, body) = send(&env, json_request("POST", "/api/scan", json!({ "device_id": "r1" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(body["error"]["message"], "Missing uid");
    assert_eq!(count_rows(env.db(), "scan_events").await, 0);
}

#[tokio::test]
async fn test_scan_with_malformed_json_is_bad_request() {
    let env = test_env().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/scan")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(&env, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_tag_scan_is_ok_response_with_false_flag() {
    let env = test_env().await;
    let (status, body) = send(
        &env,
        json_request("POST", "/api/scan", json!({ "uid": "04a1b2c3", "timestamp": "2025-03-04T09:05:00Z" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert_eq!(body["outcome"], "unknown_tag");
    assert_eq!(body["uid"], "04A1B2C3");
    assert_eq!(body["lcd_line1"], "Unknown tag");
    assert_eq!(body["note"], "Unknown or unassigned tag");
    assert!(body["scan_id"].is_i64());
}

#[tokio::test]
async fn test_recorded_scan_full_view() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;

    let (status, body) = send(
        &env,
        json_request(
            "POST",
            "/api/scan",
            json!({ "uid": "T1", "device_id": "room-101", "timestamp": "2025-03-04T09:12:00Z", "status": "in" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["outcome"], "recorded");
    assert_eq!(body["record"]["status"], "LATE");
    assert_eq!(body["section"]["id"], section.id);
    assert_eq!(body["identity"]["username"], "s1");
    assert_eq!(body["lcd_line1"], "Welcome Student s1");
    assert_eq!(body["lcd_line2"], "Late");
    assert_eq!(body["note"], "Marked late");
    assert_eq!(body["created"], true);
    assert_eq!(body["policy"]["warning_level"], 0);
}

#[tokio::test]
async fn test_reader_view_is_minimal() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;

    let (status, body) = send(
        &env,
        json_request(
            "POST",
            "/api/scan?view=reader",
            json!({ "uid": "T1", "timestamp": "2025-03-04T09:01:00Z" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "ok": true, "lcd_line1": "Welcome Student s1", "lcd_line2": "Present" })
    );
}

#[tokio::test]
async fn test_scan_records_forwarded_source_address() {
    let env = test_env().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/scan")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "10.1.2.3, 172.16.0.1")
        .body(Body::from(json!({ "uid": "AB01" }).to_string()))
        .unwrap();

    let (status, body) = send(&env, request).await;
    assert_eq!(status, StatusCode::OK);

    let source: Option<String> = sqlx::query_scalar("SELECT source_addr FROM scan_events WHERE id = ?")
        .bind(body["scan_id"].as_i64().unwrap())
        .fetch_one(env.db())
        .await
        .unwrap();
    assert_eq!(source.as_deref(), Some("10.1.2.3"));
}

#[tokio::test]
async fn test_assign_conflict_reports_current_owner() {
    let env = test_env().await;
    student(env.db(), "s1").await;
    student(env.db(), "s2").await;

    let (status, body) = send(&env, json_request("POST", "/api/tags/assign", json!({ "uid": "T1", "username": "s1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["uid"], "T1");
    assert_eq!(body["changed"], true);

    let (status, body) = send(&env, json_request("POST", "/api/tags/assign", json!({ "uid": "T1", "username": "s2" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "TAG_CONFLICT");
    assert_eq!(body["error"]["conflict"]["kind"], "uid_owned_by_other");
    assert_eq!(body["error"]["conflict"]["assigned_to"], "s1");

    let (status, body) = send(
        &env,
        json_request("POST", "/api/tags/assign", json!({ "uid": "T1", "username": "s2", "force": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "s2");
}

#[tokio::test]
async fn test_assign_conflict_on_identity_side() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;

    send(&env, json_request("POST", "/api/tags/assign", json!({ "uid": "T1", "user_id": s1.id }))).await;
    let (status, body) = send(&env, json_request("POST", "/api/tags/assign", json!({ "uid": "T2", "user_id": s1.id }))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["conflict"]["kind"], "identity_has_other_uid");
    assert_eq!(body["error"]["conflict"]["current_uid"], "T1");
}

#[tokio::test]
async fn test_assign_validation_errors() {
    let env = test_env().await;

    let (status, body) = send(&env, json_request("POST", "/api/tags/assign", json!({ "username": "s1" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Missing uid");

    let (status, body) = send(&env, json_request("POST", "/api/tags/assign", json!({ "uid": "T1" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Provide username or user_id");

    let (status, _) = send(&env, json_request("POST", "/api/tags/assign", json!({ "uid": "T1", "username": "ghost" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unassigned_list_and_tag_lookup() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;
    for (uid, ts) in [("AA", "2025-03-04T09:00:00Z"), ("BB", "2025-03-04T09:01:00Z")] {
        send(&env, json_request("POST", "/api/scan", json!({ "uid": uid, "timestamp": ts }))).await;
    }

    let (status, body) = send(&env, get("/api/tags/unassigned?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "uids": ["BB", "AA"], "limit": 5 }));

    send(&env, json_request("POST", "/api/tags/assign", json!({ "uid": "AA", "user_id": s1.id }))).await;
    let (status, body) = send(&env, get("/api/tags/AA")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner_username"], "s1");

    let (status, _) = send(&env, get("/api/tags/ZZZZ")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unassign_releases_tag() {
    let env = test_env().await;
    let s1 = student(env.db(), "s1").await;
    send(&env, json_request("POST", "/api/scan", json!({ "uid": "AA", "timestamp": "2025-03-04T09:00:00Z" }))).await;
    send(&env, json_request("POST", "/api/tags/assign", json!({ "uid": "AA", "user_id": s1.id }))).await;

    let (status, body) = send(&env, get("/api/tags/unassigned")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uids"], json!([]));

    let request = Request::builder().method("DELETE").uri("/api/tags/aa").body(Body::empty()).unwrap();
    let (status, body) = send(&env, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (_, body) = send(&env, get("/api/tags/AA")).await;
    assert!(body["owner_id"].is_null());
    let (_, body) = send(&env, get("/api/tags/unassigned")).await;
    assert_eq!(body["uids"], json!(["AA"]));

    // Nothing left to release
    let request = Request::builder().method("DELETE").uri("/api/tags/AA").body(Body::empty()).unwrap();
    let (status, _) = send(&env, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scan_log_newest_first() {
    let env = test_env().await;
    for (uid, ts) in [("AA", "2025-03-04T09:00:00Z"), ("BB", "2025-03-04T09:01:00Z"), ("AA", "2025-03-04T09:02:00Z")] {
        send(
            &env,
            json_request("POST", "/api/scan", json!({ "uid": uid, "timestamp": ts, "status": "IN", "metadata": { "rssi": -40 } })),
        )
        .await;
    }

    let (status, body) = send(&env, get("/api/scans?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let uids: Vec<&str> = body.as_array().unwrap().iter().map(|e| e["uid"].as_str().unwrap()).collect();
    assert_eq!(uids, ["AA", "BB"]);

    let (_, body) = send(&env, get("/api/scans?uid=aa")).await;
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 2);
    let newest = chrono::DateTime::parse_from_rfc3339(events[0]["scanned_at"].as_str().unwrap()).unwrap();
    assert_eq!(newest, tuesday(9, 2, 0));
    assert_eq!(events[0]["status_hint"], "IN");
    assert_eq!(events[0]["metadata"]["rssi"], -40);
}

#[tokio::test]
async fn test_close_endpoint_with_and_without_body() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;

    let (status, body) = send(
        &env,
        json_request("POST", "/api/close", json!({ "at": "2025-03-04T10:00:00Z", "grace_minutes": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["absences_marked"], 1);
    assert_eq!(body["session_date"], "2025-03-04");

    // No body at all: defaults, and nothing left to mark today
    let request = Request::builder().method("POST").uri("/api/close").body(Body::empty()).unwrap();
    let (status, body) = send(&env, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["absences_marked"].is_u64());

    let (status, _) = send(&env, json_request("POST", "/api/close", json!({ "grace_minutes": -1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_registration_override_round_trip() {
    let env = test_env().await;

    let (status, body) = send(&env, json_request("PUT", "/api/registration", json!({ "override": "closed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["open"], false);
    assert_eq!(body["reason"], "override");

    let (status, body) = send(&env, get("/api/registration?date=2025-09-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["open"], false);
    assert_eq!(body["date"], "2025-09-01");

    let (status, body) = send(&env, json_request("PUT", "/api/registration", json!({ "override": "clear" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["reason"], "override");

    let (status, _) = send(&env, json_request("PUT", "/api/registration", json!({ "override": "maybe" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_policy_endpoint() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;
    let outsider = student(env.db(), "outsider").await;

    let (status, body) = send(&env, get(&format!("/api/policy/{}/{}", s1.id, section.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["warning_level"], 0);
    assert_eq!(body["state"]["planned_sessions"], 48);

    let (status, body) = send(&env, get(&format!("/api/policy/{}/{}", outsider.id, section.id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_attendance_listing_filters() {
    let env = test_env().await;
    let section = morning_uth_section(env.db()).await;
    let s1 = enrolled_student_with_tag(env.db(), "s1", "T1", &section).await;
    seed_record(env.db(), s1.id, section.id, "2025-02-25", "ABSENT").await;
    seed_record(env.db(), s1.id, section.id, "2025-02-27", "LATE").await;
    seed_record(env.db(), s1.id, section.id, "2025-03-04", "PRESENT").await;

    let (status, body) = send(&env, get(&format!("/api/attendance?identity_id={}", s1.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["records"][0]["session_date"], "2025-03-04");

    let (_, body) = send(&env, get("/api/attendance?status=LATE")).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["records"][0]["status"], "LATE");

    let (_, body) = send(&env, get("/api/attendance?from=2025-02-26&to=2025-03-01")).await;
    assert_eq!(body["total"], 1);

    let (_, body) = send(&env, get("/api/attendance?page=2&page_size=2")).await;
    assert_eq!(body["page"], 2);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["records"].as_array().unwrap().len(), 1);

    let (status, _) = send(&env, get("/api/attendance?from=2025-03-04&to=2025-03-01")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
