// Jaskier Shared Pattern — handlers::autoreply
// Auto-reply rule CRUD (SPEC_FULL.md §10.F), including the default-reply
// upsert transaction named in spec.md §5/§8 (at most one null-keyword rule).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::models::{AutoReplyRuleRow, UpsertAutoReplyRuleRequest};
use crate::state::AppState;

pub async fn list_rules(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let rows = sqlx::query_as::<_, AutoReplyRuleRow>("SELECT * FROM autoreply_config ORDER BY priority DESC, id")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(serde_json::json!({ "rules": rows })))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<UpsertAutoReplyRuleRequest>,
) -> Result<(StatusCode, Json<AutoReplyRuleRow>)> {
    if req.response.trim().is_empty() {
        return Err(OrchestratorError::Validation("response must not be empty".to_string()));
    }

    // A null-keyword rule is the default reply: keep it unique via the
    // same transaction as the insert (spec §5/§8 "default-reply upsert").
    if req.keyword.is_none() {
        return upsert_default_rule(&state, req).await;
    }

    let row = sqlx::query_as::<_, AutoReplyRuleRow>(
        "INSERT INTO autoreply_config (keyword, response, priority, is_active) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(&req.keyword)
    .bind(&req.response)
    .bind(req.priority.unwrap_or(0))
    .bind(req.is_active.unwrap_or(true))
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

async fn upsert_default_rule(
    state: &AppState,
    req: UpsertAutoReplyRuleRequest,
) -> Result<(StatusCode, Json<AutoReplyRuleRow>)> {
    let mut tx = state.db.begin().await?;

    sqlx::query("DELETE FROM autoreply_config WHERE keyword IS NULL").execute(&mut *tx).await?;
    let row = sqlx::query_as::<_, AutoReplyRuleRow>(
        "INSERT INTO autoreply_config (keyword, response, priority, is_active) VALUES (NULL, $1, $2, $3) RETURNING *",
    )
    .bind(&req.response)
    .bind(req.priority.unwrap_or(0))
    .bind(req.is_active.unwrap_or(true))
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertAutoReplyRuleRequest>,
) -> Result<Json<AutoReplyRuleRow>> {
    let current = sqlx::query_as::<_, AutoReplyRuleRow>("SELECT * FROM autoreply_config WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound("rule not found".to_string()))?;

    let row = sqlx::query_as::<_, AutoReplyRuleRow>(
        "UPDATE autoreply_config SET keyword = $1, response = $2, priority = $3, is_active = $4 WHERE id = $5 RETURNING *",
    )
    .bind(req.keyword.or(current.keyword))
    .bind(if req.response.is_empty() { current.response } else { req.response })
    .bind(req.priority.unwrap_or(current.priority))
    .bind(req.is_active.unwrap_or(current.is_active))
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(row))
}

pub async fn delete_rule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    let result = sqlx::query("DELETE FROM autoreply_config WHERE id = $1").bind(id).execute(&state.db).await?;
    if result.rows_affected() == 0 {
        return Err(OrchestratorError::NotFound("rule not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}
