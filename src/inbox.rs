// Jaskier Shared Pattern — inbox
// Inbox Poller (spec §4.G): per-cycle sweep of each active account's DM
// sessions, dedup by last-message timestamp, rule-matched auto-reply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::audit;
use crate::error::Result;
use crate::models::{AccountRow, AutoReplyRuleRow, HARD_CODED_FALLBACK_REPLY};
use crate::platform_client::{classify, AccountCredentials, Outcome, PlatformClient};
use crate::state::AppState;

const INTER_SEND_DELAY: Duration = Duration::from_secs(3);
/// Platform code signalling a hard rate limit on messaging — stop the whole
/// account's cycle, not just this session (spec §4.G step 8).
const HARD_RATE_LIMIT_CODE: i32 = 21046;

struct Session {
    peer: i64,
    last_msg_ts: i64,
    content: String,
    sender: i64,
}

fn parse_sessions(data: &serde_json::Value) -> Vec<Session> {
    data.get("session_list")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| {
                    let peer = s.get("talker_id").and_then(|v| v.as_i64())?;
                    let last = s.get("last_msg")?;
                    let ts = last.get("timestamp").and_then(|v| v.as_i64())?;
                    let content = last
                        .get("content")
                        .and_then(|c| c.get("content"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let sender = last.get("sender_uid").and_then(|v| v.as_i64())?;
                    Some(Session { peer, last_msg_ts: ts, content, sender })
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn last_replied_ts(db: &PgPool, account_id: Uuid, talker_id: i64) -> Option<i64> {
    sqlx::query_scalar::<_, i64>("SELECT last_msg_ts FROM autoreply_state WHERE account_id = $1 AND talker_id = $2")
        .bind(account_id)
        .bind(talker_id)
        .fetch_optional(db)
        .await
        .ok()
        .flatten()
}

async fn record_replied_ts(db: &PgPool, account_id: Uuid, talker_id: i64, ts: i64) {
    if let Err(e) = sqlx::query(
        "INSERT INTO autoreply_state (account_id, talker_id, last_msg_ts) VALUES ($1, $2, $3) \
         ON CONFLICT (account_id, talker_id) DO UPDATE SET last_msg_ts = excluded.last_msg_ts",
    )
    .bind(account_id)
    .bind(talker_id)
    .bind(ts)
    .execute(db)
    .await
    {
        tracing::warn!("inbox: failed to record reply state for account={account_id} talker={talker_id}: {e}");
    }
}

/// Pick a reply for `content` per spec §4.G step 5: highest-priority active
/// keyword rule whose keyword is a substring, else the default (null-keyword)
/// rule, else a hard-coded fallback.
pub fn select_reply(rules: &[AutoReplyRuleRow], content: &str) -> String {
    let mut ordered: Vec<&AutoReplyRuleRow> = rules.iter().filter(|r| r.is_active).collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

    for rule in &ordered {
        if let Some(keyword) = &rule.keyword {
            if !keyword.is_empty() && content.contains(keyword.as_str()) {
                return rule.response.clone();
            }
        }
    }
    ordered
        .iter()
        .find(|r| r.keyword.is_none())
        .map(|r| r.response.clone())
        .unwrap_or_else(|| HARD_CODED_FALLBACK_REPLY.to_string())
}

async fn active_rules(db: &PgPool) -> Vec<AutoReplyRuleRow> {
    sqlx::query_as::<_, AutoReplyRuleRow>("SELECT * FROM autoreply_config WHERE is_active = true")
        .fetch_all(db)
        .await
        .unwrap_or_default()
}

/// Cap a per-cycle list at `limit` items, where `0` means unlimited (spec
/// §6 — `autoreply_account_batch_size`/`autoreply_session_batch_size`).
fn apply_batch_limit<T>(items: &mut Vec<T>, limit: i64) {
    if limit > 0 && (limit as usize) < items.len() {
        items.truncate(limit as usize);
    }
}

/// Run one poll cycle over every account whose status is `valid` or
/// `expiring` (spec §4.G). Sequential across accounts by design — polls are
/// cheap and rate-limit-sensitive.
pub async fn run_cycle(state: &AppState) -> Result<u64> {
    let config = state.resolved_config().await;
    let mut accounts = account_rows_for_cycle(&state.db).await?;
    apply_batch_limit(&mut accounts, config.autoreply_account_batch_size);
    let rules = active_rules(&state.db).await;
    let mut replies_sent = 0u64;

    for account in &accounts {
        replies_sent += run_cycle_for_account(state, account, &rules, config.autoreply_session_batch_size).await;
    }

    Ok(replies_sent)
}

/// One scheduled-job firing: acquire the exclusivity guard, run a cycle,
/// release. Refuses (without running) if the standalone loop currently
/// holds the guard (spec §4.G, §5 — "guard against double-delivery").
pub async fn run_cycle_exclusive(state: &AppState) -> Result<u64> {
    if !state.inbox_poller_guard.try_acquire() {
        tracing::info!("inbox: scheduled poll refused, standalone loop is active");
        return Ok(0);
    }
    let result = run_cycle(state).await;
    state.inbox_poller_guard.release();
    result
}

/// Handle returned to the caller that started the standalone loop; dropping
/// it does not stop the loop — call `stop()` explicitly.
pub struct StandaloneLoopHandle {
    stop_flag: Arc<AtomicBool>,
}

impl StandaloneLoopHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

/// Start the standalone poll loop as a background task. Refuses if a
/// scheduled job sweep is currently in flight (spec §4.G: mutually exclusive
/// with the scheduled job).
pub fn start_standalone_loop(state: Arc<AppState>) -> Result<StandaloneLoopHandle> {
    if !state.inbox_poller_guard.try_acquire() {
        return Err(crate::error::OrchestratorError::Conflict(
            "inbox poller is already running (scheduled job or another standalone loop)".to_string(),
        ));
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_task = stop_flag.clone();

    tokio::spawn(async move {
        loop {
            if stop_flag_task.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = run_cycle(&state).await {
                tracing::warn!("inbox: standalone cycle failed: {e}");
            }

            let config = state.resolved_config().await;
            let floor = config.autoreply_poll_min_interval_seconds.max(1);
            let interval = config.autoreply_poll_interval_seconds.max(floor);
            state.clock.sleep(Duration::from_secs(interval as u64)).await;
        }
        state.inbox_poller_guard.release();
    });

    Ok(StandaloneLoopHandle { stop_flag })
}

async fn account_rows_for_cycle(db: &PgPool) -> Result<Vec<AccountRow>> {
    let rows = sqlx::query_as::<_, AccountRow>(
        "SELECT * FROM accounts WHERE is_active = true AND status IN ('valid', 'expiring') ORDER BY created_at",
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}

async fn run_cycle_for_account(
    state: &AppState,
    account: &AccountRow,
    rules: &[AutoReplyRuleRow],
    session_batch_size: i64,
) -> u64 {
    let own_uid = account.uid.unwrap_or(-1);
    let credentials = AccountCredentials {
        sessdata: crate::crypto::decrypt(&account.sessdata).unwrap_or_else(|| account.sessdata.clone()),
        bili_jct: crate::crypto::decrypt(&account.bili_jct).unwrap_or_else(|| account.bili_jct.clone()),
        buvid3: account.buvid3.clone(),
        buvid4: account.buvid4.clone(),
        dedeuserid_ckmd5: account.dedeuserid_ckmd5.clone(),
        uid: account.uid,
    };
    let client = PlatformClient::new(
        &state.http_client,
        state.clock.as_ref(),
        state.fingerprint.as_ref(),
        &state.wbi_cache,
        credentials,
    );

    let envelope = client.list_recent_sessions().await;
    if classify(envelope.code) != Outcome::TerminalSuccess {
        tracing::debug!("inbox: account {} list_recent_sessions failed: {}", account.id, envelope.message);
        return 0;
    }

    let mut sessions = parse_sessions(&envelope.data);
    apply_batch_limit(&mut sessions, session_batch_size);
    let mut sent = 0u64;

    for session in sessions {
        if session.peer == own_uid || session.sender == own_uid {
            continue;
        }

        let last_replied = last_replied_ts(&state.db, account.id, session.peer).await;
        if let Some(last) = last_replied {
            if session.last_msg_ts <= last {
                continue;
            }
        }

        let reply_text = select_reply(rules, &session.content);
        let send_envelope = client.send_private_message(session.peer, &reply_text).await;
        let success = classify(send_envelope.code) == Outcome::TerminalSuccess;

        audit::log_audit(
            &state.db,
            "autoreply",
            None,
            Some(account.id),
            serde_json::json!({
                "request": { "peer": session.peer, "reply": reply_text },
                "response": send_envelope.data,
            }),
            if success { None } else { Some(send_envelope.message.as_str()) },
            success,
        )
        .await;

        // Always update, success or failure — prevents infinite retry loops
        // on a permanently-failing message (spec §4.G step 7).
        record_replied_ts(&state.db, account.id, session.peer, session.last_msg_ts).await;
        if success {
            sent += 1;
            state.events.publish(crate::events::OrchestratorEvent::InboxReplySent {
                account_id: account.id,
                session_key: session.peer.to_string(),
            });
        }

        if send_envelope.code == HARD_RATE_LIMIT_CODE {
            tracing::warn!("inbox: account {} hit hard rate limit, stopping cycle for this account", account.id);
            break;
        }

        state.clock.sleep(INTER_SEND_DELAY).await;
    }

    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn rule(id: u128, keyword: Option<&str>, response: &str, priority: i32) -> AutoReplyRuleRow {
        AutoReplyRuleRow {
            id: Uuid::from_u128(id),
            keyword: keyword.map(|s| s.to_string()),
            response: response.to_string(),
            priority,
            is_active: true,
        }
    }

    #[test]
    fn select_reply_prefers_highest_priority_keyword_match() {
        let rules = vec![
            rule(1, Some("hello"), "hi there", 1),
            rule(2, Some("hello"), "greetings", 5),
        ];
        assert_eq!(select_reply(&rules, "hello world"), "greetings");
    }

    #[test]
    fn select_reply_falls_back_to_default_rule() {
        let rules = vec![rule(1, Some("bye"), "farewell", 1), rule(2, None, "default reply", 0)];
        assert_eq!(select_reply(&rules, "hello"), "default reply");
    }

    #[test]
    fn select_reply_falls_back_to_hard_coded_string() {
        let rules = vec![rule(1, Some("bye"), "farewell", 1)];
        assert_eq!(select_reply(&rules, "hello"), HARD_CODED_FALLBACK_REPLY);
    }

    #[test]
    fn select_reply_ignores_inactive_rules() {
        let mut rules = vec![rule(1, None, "inactive default", 10)];
        rules[0].is_active = false;
        assert_eq!(select_reply(&rules, "anything"), HARD_CODED_FALLBACK_REPLY);
    }

    #[test]
    fn apply_batch_limit_zero_means_unlimited() {
        let mut items = vec![1, 2, 3];
        apply_batch_limit(&mut items, 0);
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn apply_batch_limit_truncates_to_cap() {
        let mut items = vec![1, 2, 3, 4, 5];
        apply_batch_limit(&mut items, 2);
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn apply_batch_limit_leaves_shorter_list_untouched() {
        let mut items = vec![1, 2];
        apply_batch_limit(&mut items, 10);
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn parse_sessions_extracts_last_message_fields() {
        let data = serde_json::json!({
            "session_list": [
                { "talker_id": 42, "last_msg": { "timestamp": 1000, "sender_uid": 7, "content": { "content": "hi" } } }
            ]
        });
        let sessions = parse_sessions(&data);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].peer, 42);
        assert_eq!(sessions[0].last_msg_ts, 1000);
        assert_eq!(sessions[0].sender, 7);
        assert_eq!(sessions[0].content, "hi");
    }
}
