// Jaskier Shared Pattern — dispatcher
// Work Dispatcher (spec §4.F): single-target CAS-claim sweep and a
// bounded-concurrency batch fan-out over pending targets.

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::accounts;
use crate::audit;
use crate::error::{OrchestratorError, Result};
use crate::events::OrchestratorEvent;
use crate::executor::{self, ExecutionResult};
use crate::fingerprint::Fingerprint;
use crate::governor;
use crate::models::{AccountRow, TargetRow};
use crate::platform_client::{AccountCredentials, PlatformClient};
use crate::state::AppState;

pub const MAX_RETRY: i32 = 3;
pub const MAX_RATE_LIMIT_RETRIES_PER_ACCOUNT: u32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct TargetDispatchSummary {
    pub target_id: Uuid,
    pub final_status: String,
    pub retry_count: i32,
    pub attempts: Vec<AttemptSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub account_id: Uuid,
    pub account_name: String,
    pub success: bool,
    pub message: String,
}

impl From<&ExecutionResult> for AttemptSummary {
    fn from(r: &ExecutionResult) -> Self {
        Self { account_id: r.account_id, account_name: r.account_name.clone(), success: r.success, message: r.message.clone() }
    }
}

/// CAS-claim a target: `pending` → `processing`, only if currently `pending`.
async fn claim_target(db: &PgPool, target_id: Uuid) -> Result<Option<TargetRow>> {
    let row = sqlx::query_as::<_, TargetRow>(
        "UPDATE targets SET status = 'processing', updated_at = NOW() WHERE id = $1 AND status = 'pending' RETURNING *",
    )
    .bind(target_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

async fn restore_pending(db: &PgPool, target_id: Uuid) {
    if let Err(e) = sqlx::query("UPDATE targets SET status = 'pending', updated_at = NOW() WHERE id = $1")
        .bind(target_id)
        .execute(db)
        .await
    {
        tracing::warn!("dispatcher: failed to restore target {target_id} to pending: {e}");
    }
}

async fn mark_terminal(db: &PgPool, target_id: Uuid, status: &str, bump_retry: bool) {
    let query = if bump_retry {
        "UPDATE targets SET status = $1, retry_count = retry_count + 1, updated_at = NOW() WHERE id = $2"
    } else {
        "UPDATE targets SET status = $1, updated_at = NOW() WHERE id = $2"
    };
    if let Err(e) = sqlx::query(query).bind(status).bind(target_id).execute(db).await {
        tracing::warn!("dispatcher: failed to mark target {target_id} {status}: {e}");
    }
}

fn account_credentials(row: &AccountRow) -> AccountCredentials {
    AccountCredentials {
        sessdata: crate::crypto::decrypt(&row.sessdata).unwrap_or_else(|| row.sessdata.clone()),
        bili_jct: crate::crypto::decrypt(&row.bili_jct).unwrap_or_else(|| row.bili_jct.clone()),
        buvid3: row.buvid3.clone(),
        buvid4: row.buvid4.clone(),
        dedeuserid_ckmd5: row.dedeuserid_ckmd5.clone(),
        uid: row.uid,
    }
}

/// Run the full single-target claim → sweep → terminal pipeline (spec §4.F).
pub async fn dispatch_single(
    state: &AppState,
    target_id: Uuid,
    requested_accounts: Option<Vec<Uuid>>,
) -> Result<TargetDispatchSummary> {
    let target = match claim_target(&state.db, target_id).await? {
        Some(t) => t,
        None => return Err(OrchestratorError::Conflict(format!("target {target_id} is not pending"))),
    };

    if target.retry_count >= MAX_RETRY {
        mark_terminal(&state.db, target_id, "failed", false).await;
        audit::log_audit(
            &state.db,
            "report",
            Some(target_id),
            None,
            serde_json::json!({ "request": serde_json::Value::Null, "response": serde_json::Value::Null }),
            Some("exceeded max retry"),
            false,
        )
        .await;
        return Ok(TargetDispatchSummary {
            target_id,
            final_status: "failed".to_string(),
            retry_count: target.retry_count,
            attempts: vec![],
        });
    }

    let eligible = accounts::list_active_valid(&state.db).await?;
    let selected: Vec<AccountRow> = match &requested_accounts {
        Some(ids) => {
            let set: HashSet<Uuid> = ids.iter().copied().collect();
            eligible.into_iter().filter(|a| set.contains(&a.id)).collect()
        }
        None => eligible,
    };

    if selected.is_empty() {
        restore_pending(&state.db, target_id).await;
        return Err(OrchestratorError::Validation("no active/valid accounts available for this target".to_string()));
    }

    let mut shuffled = selected;
    shuffled.shuffle(&mut rand::rng());

    let config = state.resolved_config().await;
    let delay_bounds = config.delay_bounds();
    let mut attempts = Vec::new();
    let mut any_success = false;

    for account in &shuffled {
        governor::wait_for_cooldown(&state.cooldown, state.clock.as_ref(), account.id, config.account_cooldown).await;

        let mut rate_limit_retries = 0u32;
        loop {
            let credentials = account_credentials(account);
            let client = PlatformClient::new(
                &state.http_client,
                state.clock.as_ref(),
                state.fingerprint.as_ref(),
                &state.wbi_cache,
                credentials,
            );

            let result = executor::execute(&client, &state.db, &state.events, &target, account.id, &account.name).await;
            governor::record_action(&state.cooldown, state.clock.as_ref(), account.id, config.account_cooldown).await;
            state.events.publish(OrchestratorEvent::TargetClaimed { target_id, account_id: account.id });

            let rate_limited = result.rate_limited;
            let success = result.success;
            attempts.push(AttemptSummary::from(&result));

            if rate_limited && rate_limit_retries < MAX_RATE_LIMIT_RETRIES_PER_ACCOUNT {
                rate_limit_retries += 1;
                let penalty = governor::rate_limit_penalty();
                governor::apply_penalty(&state.cooldown, state.clock.as_ref(), account.id, penalty).await;
                state.clock.sleep(std::time::Duration::from_secs_f64(penalty)).await;
                continue;
            }

            if success {
                any_success = true;
            }
            break;
        }

        if any_success {
            break;
        }

        governor::human_delay(state.clock.as_ref(), &delay_bounds).await;
    }

    let final_status = if any_success { "completed" } else { "failed" };
    mark_terminal(&state.db, target_id, final_status, true).await;

    Ok(TargetDispatchSummary {
        target_id,
        final_status: final_status.to_string(),
        retry_count: target.retry_count + 1,
        attempts,
    })
}

/// Fire-and-forget wrapper: guarantees a crash never orphans `processing`
/// (spec §4.F background exception policy).
pub async fn dispatch_single_guarded(state: Arc<AppState>, target_id: Uuid, requested_accounts: Option<Vec<Uuid>>) {
    let state_for_panic = state.clone();
    let handle = tokio::spawn(async move { dispatch_single(&state, target_id, requested_accounts).await });

    match handle.await {
        Ok(Ok(_summary)) => {}
        Ok(Err(e)) => {
            tracing::warn!("dispatch_single_guarded: target {target_id} ended with error: {e}");
        }
        Err(join_err) => {
            tracing::error!("dispatch_single_guarded: target {target_id} panicked: {join_err}");
            audit::log_background_crash(&state_for_panic.db, Some(target_id), &join_err.to_string()).await;
            mark_terminal(&state_for_panic.db, target_id, "failed", false).await;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub targets: Vec<TargetDispatchSummary>,
}

/// Batch path: resolve targets/accounts, fan out one task per target bounded
/// by a semaphore (spec §4.F batch path).
pub async fn dispatch_batch(
    state: &AppState,
    target_ids: Vec<Uuid>,
    requested_accounts: Option<Vec<Uuid>>,
) -> Result<BatchSummary> {
    let config = state.resolved_config().await;
    let semaphore = Arc::new(Semaphore::new(config.batch_semaphore_capacity.max(1)));

    let mut handles = Vec::with_capacity(target_ids.len());
    for target_id in target_ids {
        let semaphore = semaphore.clone();
        let accounts_clone = requested_accounts.clone();
        let state_clone: AppState = state.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            match dispatch_single(&state_clone, target_id, accounts_clone).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::warn!("dispatch_batch: target {target_id} failed: {e}");
                    TargetDispatchSummary { target_id, final_status: "failed".to_string(), retry_count: 0, attempts: vec![] }
                }
            }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(summary) => results.push(summary),
            Err(join_err) => {
                tracing::error!("dispatch_batch: a target task panicked: {join_err}");
            }
        }
    }

    Ok(BatchSummary { targets: results })
}

/// Startup recovery: every row left in `processing` belongs to a claimant
/// that is by definition gone (spec §4.F).
pub async fn recover_orphaned_targets(db: &PgPool) -> Result<u64> {
    let result = sqlx::query("UPDATE targets SET status = 'pending', updated_at = NOW() WHERE status = 'processing'")
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_credentials_decrypts_plaintext_passthrough() {
        let row = AccountRow {
            id: Uuid::new_v4(),
            name: "a".to_string(),
            sessdata: "s".to_string(),
            bili_jct: "j".to_string(),
            buvid3: None,
            buvid4: None,
            dedeuserid_ckmd5: None,
            refresh_token: None,
            uid: Some(1),
            group_tag: None,
            is_active: true,
            status: "valid".to_string(),
            last_check_at: None,
            created_at: chrono::Utc::now(),
        };
        let creds = account_credentials(&row);
        assert_eq!(creds.sessdata, "s");
        assert_eq!(creds.uid, Some(1));
    }
}
