use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use sentinel_orchestrator::state::AppState;

/// Helper: build a fresh app router with a clean in-memory AppState.
/// Uses `connect_lazy` — no real database connection required, so only
/// endpoints that don't round-trip to Postgres get exercised here.
fn app() -> axum::Router {
    let state = AppState::new_test();
    sentinel_orchestrator::create_router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

// ── GET /api/health ─────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_200_even_when_db_unreachable() {
    let response = app().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    // new_test()'s lazy pool never actually connects, so health degrades
    // rather than erroring — the endpoint itself must not depend on DB.
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["app"], "sentinel-orchestrator");
    assert!(json["uptime_seconds"].is_u64());
}

// ── GET /api/health/ready ───────────────────────────────────────────────

#[tokio::test]
async fn readiness_returns_503_before_mark_ready() {
    let response = app().oneshot(get("/api/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ── GET /api/auth/mode ──────────────────────────────────────────────────

#[tokio::test]
async fn auth_mode_is_open_without_auth_secret() {
    let response = app().oneshot(get("/api/auth/mode")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["mode"], "open");
}

// ── Protected routes reject unauthenticated requests once AUTH_SECRET is set ──
// (exercised indirectly via auth::require_auth unit tests — see src/auth.rs)

// ── 404 for unknown routes ──────────────────────────────────────────────

#[tokio::test]
async fn unknown_route_returns_404() {
    let response = app().oneshot(get("/api/nonexistent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ── Validation runs before any DB round-trip ────────────────────────────
// These exercise handler-level validation (models::validate_target_identifier,
// models::validate_trigger) which rejects the request before a query is ever
// issued — so they pass even against the unreachable lazy pool.

#[tokio::test]
async fn create_target_rejects_unknown_kind() {
    let body = serde_json::json!({ "kind": "playlist", "identifier": "BV1xx411c7mD" });
    let response = app().oneshot(post_json("/api/targets", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "validation");
}

#[tokio::test]
async fn create_target_rejects_malformed_video_identifier() {
    let body = serde_json::json!({ "kind": "video", "identifier": "not-a-bv-id" });
    let response = app().oneshot(post_json("/api/targets", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_target_rejects_disallowed_comment_reason() {
    let body = serde_json::json!({ "kind": "comment", "identifier": "123:456", "reason_id": 6 });
    let response = app().oneshot(post_json("/api/targets", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_scheduled_task_rejects_both_triggers() {
    let body = serde_json::json!({
        "name": "both-triggers",
        "task_type": "report_batch",
        "cron_expression": "0 * * * * *",
        "interval_seconds": 60,
    });
    let response = app().oneshot(post_json("/api/scheduled-tasks", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_scheduled_task_rejects_neither_trigger() {
    let body = serde_json::json!({ "name": "no-trigger", "task_type": "report_batch" });
    let response = app().oneshot(post_json("/api/scheduled-tasks", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_scheduled_task_rejects_invalid_cron() {
    let body = serde_json::json!({
        "name": "bad-cron",
        "task_type": "report_batch",
        "cron_expression": "not a cron expression",
    });
    let response = app().oneshot(post_json("/api/scheduled-tasks", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_autoreply_rule_rejects_empty_response() {
    let body = serde_json::json!({ "keyword": "hello", "response": "   " });
    let response = app().oneshot(post_json("/api/autoreply/rules", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ── Dispatch trigger routes accept an empty body ────────────────────────

#[tokio::test]
async fn dispatch_batch_accepts_empty_body() {
    // Hits the DB to resolve pending targets when target_ids is omitted, so
    // against the unreachable lazy pool it surfaces as an internal error
    // rather than a panic — proving the route wiring and JSON shape hold.
    let response = app().oneshot(post_json("/api/targets/dispatch-batch", serde_json::json!({}))).await.unwrap();
    assert_ne!(response.status(), StatusCode::NOT_FOUND);
}
