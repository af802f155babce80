// Jaskier Shared Pattern — handlers::targets
// Target CRUD + dispatch-trigger handlers (SPEC_FULL.md §10.F). Grounded in
// the teacher's handlers/sessions.rs CRUD shape.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::dispatcher;
use crate::error::{OrchestratorError, Result};
use crate::models::{CreateTargetRequest, TargetKind, TargetRow, DEFAULT_COMMENT_REASON};
use crate::state::AppState;

pub async fn create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> Result<(StatusCode, Json<TargetRow>)> {
    let kind = TargetKind::parse(&req.kind)
        .ok_or_else(|| OrchestratorError::Validation(format!("unknown target kind '{}'", req.kind)))?;
    crate::models::validate_target_identifier(kind, &req.identifier).map_err(OrchestratorError::Validation)?;

    if kind == TargetKind::Comment {
        if let Some(reason_id) = req.reason_id {
            if !crate::models::ALLOWED_COMMENT_REASONS.contains(&reason_id) {
                return Err(OrchestratorError::Validation(format!("reason_id {reason_id} is not allowed")));
            }
        }
    }

    let reason_id = req.reason_id.unwrap_or(DEFAULT_COMMENT_REASON);
    let row = sqlx::query_as::<_, TargetRow>(
        "INSERT INTO targets (type, identifier, aid, reason_id, reason_content_id, reason_text, display_text, status, retry_count, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $4, $5, $6, 'pending', 0, NOW(), NOW()) RETURNING *",
    )
    .bind(kind.as_str())
    .bind(&req.identifier)
    .bind(req.aid)
    .bind(reason_id)
    .bind(&req.reason_text)
    .bind(&req.display_text)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_targets(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Result<Json<serde_json::Value>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let offset = q.offset.unwrap_or(0).max(0);
    let rows = match q.status {
        Some(status) => {
            sqlx::query_as::<_, TargetRow>(
                "SELECT * FROM targets WHERE status = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, TargetRow>("SELECT * FROM targets ORDER BY created_at DESC LIMIT $1 OFFSET $2")
                .bind(limit)
                .bind(offset)
                .fetch_all(&state.db)
                .await?
        }
    };
    Ok(Json(serde_json::json!({ "targets": rows })))
}

pub async fn get_target(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<TargetRow>> {
    let row = sqlx::query_as::<_, TargetRow>("SELECT * FROM targets WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound("target not found".to_string()))?;
    Ok(Json(row))
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub account_ids: Option<Vec<Uuid>>,
}

/// Kicks off the single-target dispatch pipeline in the background and
/// returns immediately — the caller polls `GET /api/targets/{id}` for the
/// terminal status (spec §4.F fire-and-forget background-task policy).
pub async fn dispatch_target(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let state = Arc::new(state);
    tokio::spawn(dispatcher::dispatch_single_guarded(state, id, req.account_ids));
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "target_id": id, "status": "dispatching" }))))
}

#[derive(Debug, Deserialize)]
pub struct DispatchBatchRequest {
    pub target_ids: Option<Vec<Uuid>>,
    pub account_ids: Option<Vec<Uuid>>,
}

/// Runs the bounded-concurrency batch fan-out and waits for every target to
/// reach a terminal status before responding (spec §4.F batch path).
pub async fn dispatch_batch(
    State(state): State<AppState>,
    Json(req): Json<DispatchBatchRequest>,
) -> Result<Json<dispatcher::BatchSummary>> {
    let target_ids = match req.target_ids {
        Some(ids) => ids,
        None => sqlx::query_scalar("SELECT id FROM targets WHERE status = 'pending'").fetch_all(&state.db).await?,
    };
    let summary = dispatcher::dispatch_batch(&state, target_ids, req.account_ids).await?;
    Ok(Json(summary))
}
