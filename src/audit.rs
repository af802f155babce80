// Jaskier Shared Pattern — audit
// Report Log — fire-and-forget INSERT for tracking every attempt (spec §3,
// §4.E step 5). Errors are logged but never propagated; audit must not
// break the main request flow.

use serde_json::Value;
use uuid::Uuid;

pub async fn log_audit(
    pool: &sqlx::PgPool,
    action: &str,
    target_id: Option<Uuid>,
    account_id: Option<Uuid>,
    payload: Value,
    error_message: Option<&str>,
    success: bool,
) {
    let (request_data, response_data) = split_payload(&payload);

    if let Err(e) = sqlx::query(
        "INSERT INTO report_logs (target_id, account_id, action, request_data, response_data, success, error_message, executed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
    )
    .bind(target_id)
    .bind(account_id)
    .bind(action)
    .bind(request_data)
    .bind(response_data)
    .bind(success)
    .bind(error_message)
    .execute(pool)
    .await
    {
        tracing::warn!("audit: failed to log action={action}: {e}");
    }
}

fn split_payload(payload: &Value) -> (Value, Value) {
    (
        payload.get("request").cloned().unwrap_or(Value::Null),
        payload.get("response").cloned().unwrap_or(Value::Null),
    )
}

/// Record a background-task crash without losing the target/account context
/// (spec §4.F: "any escape from step 1-6 must persist an audit row tagged
/// background_task_crash").
pub async fn log_background_crash(pool: &sqlx::PgPool, target_id: Option<Uuid>, reason: &str) {
    log_audit(
        pool,
        "background_task_crash",
        target_id,
        None,
        serde_json::json!({ "request": Value::Null, "response": Value::Null }),
        Some(reason),
        false,
    )
    .await;
}
