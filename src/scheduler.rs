// Jaskier Shared Pattern — scheduler
// Scheduler (spec §4.H): a process-wide cooperative job runner wrapping
// tokio-cron-scheduler. Coalesces missed fires and caps concurrent
// instances per job at 1 via the underlying library's defaults.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{validate_trigger, ScheduledTaskRow, TaskKind};
use crate::state::AppState;

const LOG_CLEANUP_INTERVAL_SECS: u64 = 24 * 3600;
const HEALTH_SWEEP_INTERVAL_SECS: u64 = 6 * 3600;

/// Holds only a `Weak` handle to `AppState` — `AppState` in turn holds the
/// running `Scheduler` (for CRUD-triggered re-registration), so an `Arc`
/// here would leak both in a reference cycle.
pub struct Scheduler {
    inner: JobScheduler,
    /// task row id → registered tokio-cron-scheduler job id, so CRUD can
    /// unregister/re-register atomically (spec §4.H CRUD).
    registry: Arc<Mutex<HashMap<Uuid, Uuid>>>,
    state: Weak<AppState>,
    db: PgPool,
}

impl Scheduler {
    pub async fn new(state: Weak<AppState>, db: PgPool) -> anyhow::Result<Self> {
        let inner = JobScheduler::new().await?;
        Ok(Self { inner, registry: Arc::new(Mutex::new(HashMap::new())), state, db })
    }

    /// Register every active, valid task from the DB, deactivating rows
    /// whose trigger is malformed instead of silently falling back (spec §4.H
    /// startup repair). Then ensure the two built-in jobs exist.
    pub async fn bootstrap(&self) -> Result<()> {
        let tasks = sqlx::query_as::<_, ScheduledTaskRow>("SELECT * FROM scheduled_tasks WHERE is_active = true")
            .fetch_all(&self.db)
            .await?;

        for task in tasks {
            if validate_trigger(&task.cron_expression, &task.interval_seconds).is_err() {
                tracing::warn!("scheduler: deactivating task {} with invalid trigger", task.id);
                sqlx::query("UPDATE scheduled_tasks SET is_active = false WHERE id = $1")
                    .bind(task.id)
                    .execute(&self.db)
                    .await?;
                continue;
            }
            if let Err(e) = self.register(&task).await {
                tracing::warn!("scheduler: failed to register task {}: {e}", task.id);
            }
        }

        self.ensure_builtin_jobs().await?;
        Ok(())
    }

    async fn ensure_builtin_jobs(&self) -> Result<()> {
        self.ensure_builtin(TaskKind::CookieHealthCheck, "credential-health-sweep", HEALTH_SWEEP_INTERVAL_SECS).await?;
        self.ensure_builtin(TaskKind::LogCleanup, "log-retention-cleanup", LOG_CLEANUP_INTERVAL_SECS).await?;
        Ok(())
    }

    async fn ensure_builtin(&self, kind: TaskKind, name: &str, interval_secs: u64) -> Result<()> {
        let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM scheduled_tasks WHERE task_type = $1")
            .bind(kind.as_str())
            .fetch_optional(&self.db)
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        let row = sqlx::query_as::<_, ScheduledTaskRow>(
            "INSERT INTO scheduled_tasks (name, task_type, interval_seconds, is_active, config_json) \
             VALUES ($1, $2, $3, true, '{}'::jsonb) RETURNING *",
        )
        .bind(name)
        .bind(kind.as_str())
        .bind(interval_secs as i32)
        .fetch_one(&self.db)
        .await?;

        self.register(&row).await
    }

    /// Register (or re-register) a task's job. Validation happens before
    /// this is called from CRUD paths, so a bad trigger never reaches the
    /// scheduler (spec §4.H CRUD atomicity).
    pub async fn register(&self, task: &ScheduledTaskRow) -> Result<()> {
        self.unregister(task.id).await;

        let kind = TaskKind::parse(&task.task_type);
        let state = self.state.clone();
        let task_id = task.id;

        let job = if let Some(cron) = &task.cron_expression {
            Job::new_async(cron.as_str(), move |_uuid, _l| {
                let state = state.clone();
                Box::pin(async move {
                    if let Some(state) = state.upgrade() {
                        run_task(&state, task_id, kind).await;
                    }
                })
            })
            .map_err(|e| crate::error::OrchestratorError::Validation(format!("invalid cron expression: {e}")))?
        } else if let Some(secs) = task.interval_seconds {
            Job::new_repeated_async(std::time::Duration::from_secs(secs.max(1) as u64), move |_uuid, _l| {
                let state = state.clone();
                Box::pin(async move {
                    if let Some(state) = state.upgrade() {
                        run_task(&state, task_id, kind).await;
                    }
                })
            })
            .map_err(|e| crate::error::OrchestratorError::Validation(format!("invalid interval: {e}")))?
        } else {
            return Err(crate::error::OrchestratorError::Validation(
                "task has neither cron_expression nor interval_seconds".to_string(),
            ));
        };

        let job_id = self.inner.add(job).await.map_err(|e| crate::error::OrchestratorError::Internal(e.to_string()))?;
        self.registry.lock().await.insert(task.id, job_id);
        Ok(())
    }

    pub async fn unregister(&self, task_id: Uuid) {
        let job_id = self.registry.lock().await.remove(&task_id);
        if let Some(job_id) = job_id {
            if let Err(e) = self.inner.remove(&job_id).await {
                tracing::warn!("scheduler: failed to remove job for task {task_id}: {e}");
            }
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.inner.start().await?;
        Ok(())
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

async fn run_task(state: &AppState, task_id: Uuid, kind: Option<TaskKind>) {
    let Some(kind) = kind else {
        tracing::warn!("scheduler: task {task_id} has unrecognized task_type, skipping");
        return;
    };

    let outcome: anyhow::Result<()> = match kind {
        TaskKind::ReportBatch => run_report_batch(state).await,
        TaskKind::AutoreplyPoll => {
            crate::inbox::run_cycle_exclusive(state).await.map(|_| ()).map_err(Into::into)
        }
        TaskKind::CookieHealthCheck => crate::credential_lifecycle::health_sweep(state).await.map_err(Into::into),
        TaskKind::LogCleanup => run_log_cleanup(state).await,
    };

    if let Err(e) = outcome {
        tracing::warn!("scheduler: task {task_id} ({}) failed: {e}", kind.as_str());
    }

    let _ = sqlx::query("UPDATE scheduled_tasks SET last_run_at = NOW() WHERE id = $1")
        .bind(task_id)
        .execute(&state.db)
        .await;
}

async fn run_report_batch(state: &AppState) -> anyhow::Result<()> {
    let pending_ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM targets WHERE status = 'pending'")
        .fetch_all(&state.db)
        .await?;
    if pending_ids.is_empty() {
        return Ok(());
    }
    crate::dispatcher::dispatch_batch(state, pending_ids, None).await?;
    Ok(())
}

/// DELETE audit rows older than `log_retention_days`, guarded by the
/// `auto_clean_logs` master flag (spec §4.H task delegation).
async fn run_log_cleanup(state: &AppState) -> anyhow::Result<()> {
    let config = state.resolved_config().await;
    if !config.auto_clean_logs {
        return Ok(());
    }
    sqlx::query("DELETE FROM report_logs WHERE executed_at < NOW() - ($1 || ' days')::interval")
        .bind(config.log_retention_days.to_string())
        .execute(&state.db)
        .await?;
    Ok(())
}

pub async fn recover_invalid_tasks(db: &PgPool) -> Result<()> {
    let tasks = sqlx::query_as::<_, ScheduledTaskRow>("SELECT * FROM scheduled_tasks WHERE is_active = true").fetch_all(db).await?;
    for task in tasks {
        if validate_trigger(&task.cron_expression, &task.interval_seconds).is_err() {
            sqlx::query("UPDATE scheduled_tasks SET is_active = false WHERE id = $1").bind(task.id).execute(db).await?;
        }
    }
    Ok(())
}
