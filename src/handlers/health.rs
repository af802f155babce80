// Jaskier Shared Pattern — handlers::health
// Health, readiness, auth mode, and the live event feed (SSE over the
// broadcast bus in events.rs — spec §6/SPEC_FULL.md §10.F).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};
use futures_util::stream::Stream;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();

    Json(json!({
        "status": if db_ok { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "app": "sentinel-orchestrator",
        "uptime_seconds": uptime,
        "providers": [
            { "name": "database", "available": db_ok },
        ],
    }))
}

pub async fn readiness(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    if state.is_ready() {
        Ok(Json(json!({ "ready": true })))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

pub async fn auth_mode(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mode = if state.auth_secret.is_some() { "protected" } else { "open" };
    Json(json!({ "mode": mode }))
}

/// Streams every `OrchestratorEvent` published to the process-wide broadcast
/// bus as it happens. A lagging subscriber silently drops missed events
/// rather than blocking producers (spec §6 pub/sub boundary).
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(event) => serde_json::to_string(&event).ok().map(|data| Ok(Event::default().data(data))),
        Err(_lagged) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}

pub async fn system_stats(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.resolved_config().await;
    Json(json!({
        "min_delay": config.min_delay,
        "max_delay": config.max_delay,
        "account_cooldown": config.account_cooldown,
        "log_retention_days": config.log_retention_days,
        "auto_clean_logs": config.auto_clean_logs,
        "batch_semaphore_capacity": config.batch_semaphore_capacity,
    }))
}
