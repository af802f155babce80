// Jaskier Shared Pattern — models
// Shared DB row types and wire types for the orchestrator core (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ── Account ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Unknown,
    Valid,
    Invalid,
    Expiring,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Unknown => "unknown",
            AccountStatus::Valid => "valid",
            AccountStatus::Invalid => "invalid",
            AccountStatus::Expiring => "expiring",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "valid" => AccountStatus::Valid,
            "invalid" => AccountStatus::Invalid,
            "expiring" => AccountStatus::Expiring,
            _ => AccountStatus::Unknown,
        }
    }
}

/// Full DB row — never serialized directly to an untrusted caller.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: uuid::Uuid,
    pub name: String,
    pub sessdata: String,
    pub bili_jct: String,
    pub buvid3: Option<String>,
    pub buvid4: Option<String>,
    pub dedeuserid_ckmd5: Option<String>,
    pub refresh_token: Option<String>,
    pub uid: Option<i64>,
    pub group_tag: Option<String>,
    pub is_active: bool,
    pub status: String,
    pub last_check_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Public projection — strips session token, CSRF token, refresh token,
/// cookie checksum (spec §4.A).
#[derive(Debug, Clone, Serialize)]
pub struct AccountPublic {
    pub id: uuid::Uuid,
    pub name: String,
    pub uid: Option<i64>,
    pub group_tag: Option<String>,
    pub is_active: bool,
    pub status: String,
    pub last_check_at: Option<String>,
    pub created_at: String,
}

impl From<&AccountRow> for AccountPublic {
    fn from(r: &AccountRow) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            uid: r.uid,
            group_tag: r.group_tag.clone(),
            is_active: r.is_active,
            status: r.status.clone(),
            last_check_at: r.last_check_at.map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            created_at: r.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// Credentialed projection — only returned on explicit authenticated request
/// and emitted with no-store cache directives by the handler.
#[derive(Debug, Clone, Serialize)]
pub struct AccountCredentialed {
    pub id: uuid::Uuid,
    pub name: String,
    pub sessdata: String,
    pub bili_jct: String,
    pub buvid3: Option<String>,
    pub buvid4: Option<String>,
    pub dedeuserid_ckmd5: Option<String>,
    pub refresh_token: Option<String>,
    pub uid: Option<i64>,
}

impl From<&AccountRow> for AccountCredentialed {
    fn from(r: &AccountRow) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            sessdata: r.sessdata.clone(),
            bili_jct: r.bili_jct.clone(),
            buvid3: r.buvid3.clone(),
            buvid4: r.buvid4.clone(),
            dedeuserid_ckmd5: r.dedeuserid_ckmd5.clone(),
            refresh_token: r.refresh_token.clone(),
            uid: r.uid,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub sessdata: String,
    pub bili_jct: String,
    pub buvid3: Option<String>,
    pub buvid4: Option<String>,
    pub dedeuserid_ckmd5: Option<String>,
    pub refresh_token: Option<String>,
    pub uid: Option<i64>,
    pub group_tag: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAccountRequest {
    pub name: Option<String>,
    pub sessdata: Option<String>,
    pub bili_jct: Option<String>,
    pub buvid3: Option<String>,
    pub buvid4: Option<String>,
    pub dedeuserid_ckmd5: Option<String>,
    pub refresh_token: Option<String>,
    pub group_tag: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdateAccountRequest {
    /// True when this update touches any credential-triplet field — such an
    /// update resets status to `unknown` and clears `last_check_at` (§4.A).
    pub fn touches_credentials(&self) -> bool {
        self.sessdata.is_some()
            || self.bili_jct.is_some()
            || self.buvid3.is_some()
            || self.buvid4.is_some()
            || self.dedeuserid_ckmd5.is_some()
            || self.refresh_token.is_some()
    }
}

// ── Target ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Video,
    Comment,
    User,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Video => "video",
            TargetKind::Comment => "comment",
            TargetKind::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(TargetKind::Video),
            "comment" => Some(TargetKind::Comment),
            "user" => Some(TargetKind::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Processing => "processing",
            TargetStatus::Completed => "completed",
            TargetStatus::Failed => "failed",
        }
    }
}

/// Allowed comment reason codes (spec §4.E step 2).
pub const ALLOWED_COMMENT_REASONS: &[i32] = &[1, 2, 3, 4, 5, 7, 8, 9];
pub const DEFAULT_COMMENT_REASON: i32 = 4;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TargetRow {
    pub id: uuid::Uuid,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub identifier: String,
    pub aid: Option<i64>,
    pub reason_id: Option<i32>,
    pub reason_content_id: Option<i32>,
    pub reason_text: Option<String>,
    pub display_text: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetRequest {
    pub kind: String,
    pub identifier: String,
    pub aid: Option<i64>,
    pub reason_id: Option<i32>,
    pub reason_text: Option<String>,
    pub display_text: Option<String>,
}

/// Validates `identifier` against `kind` per the invariants in spec §3.
pub fn validate_target_identifier(kind: TargetKind, identifier: &str) -> Result<(), String> {
    if identifier.trim().is_empty() {
        return Err("identifier must not be empty".to_string());
    }
    match kind {
        TargetKind::Video => {
            if identifier.starts_with("BV") {
                Ok(())
            } else if identifier.chars().all(|c| c.is_ascii_digit()) {
                Ok(())
            } else {
                Err(format!("invalid video identifier '{identifier}': expected BV… or numeric aid"))
            }
        }
        TargetKind::Comment => {
            if let Some((oid, rpid)) = identifier.split_once(':') {
                if oid.chars().all(|c| c.is_ascii_digit()) && rpid.chars().all(|c| c.is_ascii_digit()) {
                    Ok(())
                } else {
                    Err(format!("invalid comment identifier '{identifier}': expected 'oid:rpid' with numeric parts"))
                }
            } else if identifier.chars().all(|c| c.is_ascii_digit()) {
                Ok(())
            } else {
                Err(format!("invalid comment identifier '{identifier}': expected 'oid:rpid' or numeric rpid"))
            }
        }
        TargetKind::User => {
            if identifier.chars().all(|c| c.is_ascii_digit()) {
                Ok(())
            } else {
                Err(format!("invalid user identifier '{identifier}': expected numeric mid"))
            }
        }
    }
}

// ── Report Log ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ReportLogRow {
    pub id: uuid::Uuid,
    pub target_id: Option<uuid::Uuid>,
    pub account_id: Option<uuid::Uuid>,
    pub action: String,
    pub request_data: Option<Value>,
    pub response_data: Option<Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub executed_at: chrono::DateTime<chrono::Utc>,
}

// ── Auto-reply Rule ─────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AutoReplyRuleRow {
    pub id: uuid::Uuid,
    pub keyword: Option<String>,
    pub response: String,
    pub priority: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertAutoReplyRuleRequest {
    pub keyword: Option<String>,
    pub response: String,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

/// Fallback used when no keyword rule matches and no default rule exists
/// (spec §4.G step 5).
pub const HARD_CODED_FALLBACK_REPLY: &str =
    "Thanks for your message — we'll get back to you soon.";

// ── Scheduled Task ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ReportBatch,
    AutoreplyPoll,
    CookieHealthCheck,
    LogCleanup,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ReportBatch => "report_batch",
            TaskKind::AutoreplyPoll => "autoreply_poll",
            TaskKind::CookieHealthCheck => "cookie_health_check",
            TaskKind::LogCleanup => "log_cleanup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "report_batch" => Some(TaskKind::ReportBatch),
            "autoreply_poll" => Some(TaskKind::AutoreplyPoll),
            "cookie_health_check" => Some(TaskKind::CookieHealthCheck),
            "log_cleanup" => Some(TaskKind::LogCleanup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ScheduledTaskRow {
    pub id: uuid::Uuid,
    pub name: String,
    pub task_type: String,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i32>,
    pub is_active: bool,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub config_json: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertScheduledTaskRequest {
    pub name: String,
    pub task_type: String,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i32>,
    pub is_active: Option<bool>,
    pub config_json: Option<Value>,
}

/// Exactly one of (cron_expression, interval_seconds) must be set (spec §4.H).
pub fn validate_trigger(cron: &Option<String>, interval: &Option<i32>) -> Result<(), String> {
    match (cron, interval) {
        (Some(_), Some(_)) => Err("exactly one of cron_expression/interval_seconds must be set, not both".to_string()),
        (None, None) => Err("one of cron_expression/interval_seconds is required".to_string()),
        (Some(expr), None) => {
            if tokio_cron_scheduler::Job::new_async(expr.as_str(), |_, _| Box::pin(async {})).is_err() {
                Err(format!("invalid cron expression: {expr}"))
            } else {
                Ok(())
            }
        }
        (None, Some(secs)) => {
            if *secs <= 0 {
                Err("interval_seconds must be positive".to_string())
            } else {
                Ok(())
            }
        }
    }
}

// ── Inbox Reply State ───────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InboxReplyStateRow {
    pub account_id: uuid::Uuid,
    pub talker_id: i64,
    pub last_msg_ts: i64,
}

// ── Misc wire helpers ───────────────────────────────────────────────────

pub fn now_iso() -> String {
    utc_now_iso()
}
