pub mod accounts;
pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod credential_lifecycle;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod fingerprint;
pub mod governor;
pub mod handlers;
pub mod inbox;
pub mod models;
pub mod platform_client;
pub mod scheduler;
pub mod signing;
pub mod state;

use axum::extract::State;
use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use state::AppState;

// ═══════════════════════════════════════════════════════════════════════
//  Request correlation ID middleware — Jaskier Shared Pattern
// ═══════════════════════════════════════════════════════════════════════

/// Middleware that generates a UUID v4 correlation ID for each request.
///
/// - Adds it to the current tracing span as `request_id`
/// - Returns it in the `X-Request-Id` response header
/// - Accepts an incoming `X-Request-Id` header to propagate from upstream
async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("request_id", &request_id.as_str());
    tracing::debug!(request_id = %request_id, "request correlation ID assigned");

    let mut response = next.run(req).await;

    if let Ok(header_value) = axum::http::HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", header_value);
    }

    response
}

/// Build the application router with the given shared state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // Admin/dispatch-trigger routes sustain bursts when a batch fans out
    // many single-target dispatch calls; other routes get a calmer ceiling.
    let rl_dispatch = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(30)
        .finish()
        .expect("rate limiter config: dispatch");
    let rl_default = GovernorConfigBuilder::default()
        .per_millisecond(500)
        .burst_size(120)
        .finish()
        .expect("rate limiter config: default");

    let public = Router::new()
        .route("/api/health", get(handlers::health::health_check))
        .route("/api/health/ready", get(handlers::health::readiness))
        .route("/api/auth/mode", get(handlers::health::auth_mode));

    let dispatch_routes = Router::new()
        .route("/api/targets/{id}/dispatch", post(handlers::targets::dispatch_target))
        .route("/api/targets/dispatch-batch", post(handlers::targets::dispatch_batch))
        .layer(GovernorLayer::new(rl_dispatch));

    let other_routes = Router::new()
        .route("/api/system/stats", get(handlers::health::system_stats))
        .route("/api/events", get(handlers::health::event_stream))
        .route(
            "/api/accounts",
            get(handlers::accounts::list_accounts).post(handlers::accounts::create_account),
        )
        .route(
            "/api/accounts/{id}",
            get(handlers::accounts::get_account)
                .patch(handlers::accounts::update_account)
                .delete(handlers::accounts::delete_account),
        )
        .route("/api/accounts/{id}/credentials", get(handlers::accounts::get_account_credentials))
        .route("/api/accounts/{id}/refresh", post(handlers::accounts::refresh_account))
        .route("/api/accounts/qr/generate", post(handlers::accounts::qr_login_generate))
        .route("/api/accounts/qr/poll", get(handlers::accounts::qr_login_poll))
        .route(
            "/api/targets",
            get(handlers::targets::list_targets).post(handlers::targets::create_target),
        )
        .route("/api/targets/{id}", get(handlers::targets::get_target))
        .route(
            "/api/autoreply/rules",
            get(handlers::autoreply::list_rules).post(handlers::autoreply::create_rule),
        )
        .route(
            "/api/autoreply/rules/{id}",
            patch(handlers::autoreply::update_rule).delete(handlers::autoreply::delete_rule),
        )
        .route(
            "/api/scheduled-tasks",
            get(handlers::scheduled_tasks::list_tasks).post(handlers::scheduled_tasks::create_task),
        )
        .route(
            "/api/scheduled-tasks/{id}",
            patch(handlers::scheduled_tasks::update_task).delete(handlers::scheduled_tasks::delete_task),
        )
        .layer(GovernorLayer::new(rl_default));

    let protected = dispatch_routes
        .merge(other_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    public
        .merge(protected)
        .route("/api/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}

// ── Prometheus-compatible metrics endpoint ───────────────────────────────────

async fn metrics_handler(State(state): State<AppState>) -> String {
    let uptime = state.start_time.elapsed().as_secs();
    format!(
        "# HELP uptime_seconds Backend uptime in seconds\n\
         # TYPE uptime_seconds counter\n\
         uptime_seconds {}\n\
         # HELP orchestrator_ready Whether startup recovery has completed\n\
         # TYPE orchestrator_ready gauge\n\
         orchestrator_ready {}\n",
        uptime,
        if state.is_ready() { 1 } else { 0 },
    )
}
