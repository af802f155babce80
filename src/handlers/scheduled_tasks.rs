// Jaskier Shared Pattern — handlers::scheduled_tasks
// Scheduled task CRUD (SPEC_FULL.md §10.F) so the Scheduler component
// (spec §4.H) is operable without direct SQL access. Validation happens here
// before a task ever reaches the live scheduler (spec §4.H CRUD atomicity).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::models::{validate_trigger, ScheduledTaskRow, UpsertScheduledTaskRequest};
use crate::state::AppState;

pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let rows = sqlx::query_as::<_, ScheduledTaskRow>("SELECT * FROM scheduled_tasks ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(serde_json::json!({ "tasks": rows })))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<UpsertScheduledTaskRequest>,
) -> Result<(StatusCode, Json<ScheduledTaskRow>)> {
    validate_trigger(&req.cron_expression, &req.interval_seconds).map_err(OrchestratorError::Validation)?;

    let row = sqlx::query_as::<_, ScheduledTaskRow>(
        "INSERT INTO scheduled_tasks (name, task_type, cron_expression, interval_seconds, is_active, config_json) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(&req.name)
    .bind(&req.task_type)
    .bind(&req.cron_expression)
    .bind(req.interval_seconds)
    .bind(req.is_active.unwrap_or(true))
    .bind(req.config_json.unwrap_or_else(|| serde_json::json!({})))
    .fetch_one(&state.db)
    .await?;

    register_live(&state, &row).await;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertScheduledTaskRequest>,
) -> Result<Json<ScheduledTaskRow>> {
    validate_trigger(&req.cron_expression, &req.interval_seconds).map_err(OrchestratorError::Validation)?;

    let row = sqlx::query_as::<_, ScheduledTaskRow>(
        "UPDATE scheduled_tasks SET name = $1, task_type = $2, cron_expression = $3, interval_seconds = $4, \
         is_active = $5, config_json = $6 WHERE id = $7 RETURNING *",
    )
    .bind(&req.name)
    .bind(&req.task_type)
    .bind(&req.cron_expression)
    .bind(req.interval_seconds)
    .bind(req.is_active.unwrap_or(true))
    .bind(req.config_json.unwrap_or_else(|| serde_json::json!({})))
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| OrchestratorError::NotFound("scheduled task not found".to_string()))?;

    if let Some(scheduler) = state.scheduler.read().await.as_ref() {
        if row.is_active {
            if let Err(e) = scheduler.register(&row).await {
                tracing::warn!("scheduled_tasks: failed to re-register task {id}: {e}");
            }
        } else {
            scheduler.unregister(id).await;
        }
    }

    Ok(Json(row))
}

pub async fn delete_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = $1").bind(id).execute(&state.db).await?;
    if result.rows_affected() == 0 {
        return Err(OrchestratorError::NotFound("scheduled task not found".to_string()));
    }
    if let Some(scheduler) = state.scheduler.read().await.as_ref() {
        scheduler.unregister(id).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn register_live(state: &AppState, row: &ScheduledTaskRow) {
    if !row.is_active {
        return;
    }
    if let Some(scheduler) = state.scheduler.read().await.as_ref() {
        if let Err(e) = scheduler.register(row).await {
            tracing::warn!("scheduled_tasks: failed to register task {}: {e}", row.id);
        }
    }
}
