// Jaskier Shared Pattern — executor
// Action Executor (spec §4.E): given (target, account), produce a single
// report attempt, write an audit log, publish a live event. Never propagates
// a panic/exception as a worker crash — unhandled failures become a failed
// result record plus an audit entry.

use serde_json::json;
use uuid::Uuid;

use crate::events::{EventBus, OrchestratorEvent};
use crate::models::{TargetKind, TargetRow, ALLOWED_COMMENT_REASONS, DEFAULT_COMMENT_REASON};
use crate::platform_client::{classify, Outcome, PlatformClient};

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub target_id: Uuid,
    pub account_id: Uuid,
    pub account_name: String,
    pub success: bool,
    pub message: String,
    pub raw: serde_json::Value,
    pub rate_limited: bool,
}

/// Resolve the numeric `aid` for a video target, memoizing via `get_video_info`
/// when only a `BV…` identifier is known (spec §4.E step 1).
async fn resolve_video_aid(client: &PlatformClient<'_>, target: &TargetRow) -> Result<i64, String> {
    if let Some(aid) = target.aid {
        return Ok(aid);
    }
    if !target.identifier.starts_with("BV") {
        return target.identifier.parse::<i64>().map_err(|_| "identifier is neither BV… nor numeric aid".to_string());
    }
    let envelope = client.get_video_info(&target.identifier).await;
    if classify(envelope.code) != Outcome::TerminalSuccess {
        return Err(format!("get_video_info failed: code={} message={}", envelope.code, envelope.message));
    }
    envelope
        .data
        .get("aid")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| "get_video_info response missing aid".to_string())
}

fn resolve_comment_ids(target: &TargetRow) -> Result<(i64, i64), String> {
    if let Some((oid, rpid)) = target.identifier.split_once(':') {
        let oid: i64 = oid.parse().map_err(|_| "comment oid is not numeric".to_string())?;
        let rpid: i64 = rpid.parse().map_err(|_| "comment rpid is not numeric".to_string())?;
        return Ok((oid, rpid));
    }
    let rpid: i64 = target.identifier.parse().map_err(|_| "comment identifier is not numeric".to_string())?;
    let oid = target.aid.ok_or("comment target missing oid (no pre-resolved aid and no 'oid:rpid' identifier)")?;
    Ok((oid, rpid))
}

fn normalize_comment_reason(reason: Option<i32>) -> i32 {
    match reason {
        Some(r) if ALLOWED_COMMENT_REASONS.contains(&r) => r,
        _ => DEFAULT_COMMENT_REASON,
    }
}

/// Execute one (target, account) attempt. Returns a result record; never
/// propagates a panic — callers that want full crash isolation should run
/// this inside `tokio::spawn` and catch join errors separately.
pub async fn execute(
    client: &PlatformClient<'_>,
    db: &sqlx::PgPool,
    events: &EventBus,
    target: &TargetRow,
    account_id: Uuid,
    account_name: &str,
) -> ExecutionResult {
    let outcome = run_attempt(client, target).await;

    let (success, message, raw, rate_limited) = match outcome {
        Ok((envelope_code, envelope_message, envelope_data)) => {
            let classified = classify(envelope_code);
            let success = classified == Outcome::TerminalSuccess;
            let rate_limited = matches!(classified, Outcome::RateLimitRetry | Outcome::DispatcherRateLimit);
            (success, envelope_message, envelope_data, rate_limited)
        }
        Err(e) => (false, e, serde_json::Value::Null, false),
    };

    let request_snapshot = json!({ "identifier": target.identifier, "reason_id": target.reason_id, "kind": target.kind });
    crate::audit::log_audit(
        db,
        "report",
        Some(target.id),
        Some(account_id),
        json!({ "request": request_snapshot, "response": raw, "success": success, "error": if success { None } else { Some(message.clone()) } }),
        if success { None } else { Some(message.as_str()) },
        success,
    )
    .await;

    events.publish(if success {
        OrchestratorEvent::TargetCompleted { target_id: target.id, account_id }
    } else {
        OrchestratorEvent::TargetFailed { target_id: target.id, account_id, reason: message.clone() }
    });

    ExecutionResult {
        target_id: target.id,
        account_id,
        account_name: account_name.to_string(),
        success,
        message,
        raw,
        rate_limited,
    }
}

async fn run_attempt(client: &PlatformClient<'_>, target: &TargetRow) -> Result<(i32, String, serde_json::Value), String> {
    let kind = TargetKind::parse(&target.kind).ok_or_else(|| format!("unknown target kind '{}'", target.kind))?;
    let reason = target.reason_id.unwrap_or(DEFAULT_COMMENT_REASON);
    let text = target.reason_text.clone().unwrap_or_default();

    let envelope = match kind {
        TargetKind::Video => {
            let aid = resolve_video_aid(client, target).await?;
            client.report_video(aid, reason, &text, &target.identifier).await
        }
        TargetKind::Comment => {
            let (oid, rpid) = resolve_comment_ids(target)?;
            let reason = normalize_comment_reason(target.reason_id);
            let bv = target.identifier.split(':').next().unwrap_or(&target.identifier);
            client.report_comment(oid, rpid, reason, &text, bv).await
        }
        TargetKind::User => {
            let mid: i64 = target.identifier.parse().map_err(|_| "user identifier is not numeric".to_string())?;
            let category = target.reason_id.unwrap_or(1);
            let content_kind = target.reason_content_id.unwrap_or(1);
            client.report_user(mid, category, content_kind).await
        }
    };

    Ok((envelope.code, envelope.message, envelope.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_target(kind: &str, identifier: &str, aid: Option<i64>) -> TargetRow {
        TargetRow {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            identifier: identifier.to_string(),
            aid,
            reason_id: None,
            reason_content_id: None,
            reason_text: None,
            display_text: None,
            status: "pending".to_string(),
            retry_count: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn comment_identifier_oid_rpid_split() {
        let target = sample_target("comment", "111:222", None);
        assert_eq!(resolve_comment_ids(&target), Ok((111, 222)));
    }

    #[test]
    fn comment_identifier_bare_rpid_uses_target_aid() {
        let target = sample_target("comment", "222", Some(111));
        assert_eq!(resolve_comment_ids(&target), Ok((111, 222)));
    }

    #[test]
    fn comment_identifier_bare_rpid_without_aid_errors() {
        let target = sample_target("comment", "222", None);
        assert!(resolve_comment_ids(&target).is_err());
    }

    #[test]
    fn comment_reason_normalizes_to_default() {
        assert_eq!(normalize_comment_reason(Some(999)), DEFAULT_COMMENT_REASON);
        assert_eq!(normalize_comment_reason(None), DEFAULT_COMMENT_REASON);
        assert_eq!(normalize_comment_reason(Some(7)), 7);
    }
}
