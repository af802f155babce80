// Jaskier Shared Pattern — credential_lifecycle
// Credential Lifecycle (spec §4.I): QR login handshake, cookie-refresh
// handshake, WBI key refresher, and the periodic health sweep that ties
// them together.

use regex::Regex;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::accounts;
use crate::error::{OrchestratorError, Result};
use crate::models::AccountStatus;
use crate::platform_client::{classify, AccountCredentials, Outcome, PlatformClient};
use crate::state::AppState;

/// Force a WBI key refresh regardless of staleness (spec §4.I WBI refresh —
/// "a background task refreshes proactively each hour and on demand").
pub async fn refresh_wbi_keys(state: &AppState) -> anyhow::Result<()> {
    let http = &state.http_client;
    state
        .wbi_cache
        .ensure_fresh(|| async move { crate::platform_client::fetch_wbi_keys(http).await })
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct QrLoginSession {
    pub qrcode_key: String,
    pub url: String,
}

/// Step 1 of QR login: fetch a `{qrcode_key, url}` pair (spec §4.I).
pub async fn qr_generate(state: &AppState) -> Result<QrLoginSession> {
    let client = anonymous_client(state);
    let envelope = client.qrcode_generate().await;
    if classify(envelope.code) != Outcome::TerminalSuccess {
        return Err(OrchestratorError::PlatformTransient(format!("qr generate failed: {}", envelope.message)));
    }
    let qrcode_key = envelope.data.get("qrcode_key").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let url = envelope.data.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    Ok(QrLoginSession { qrcode_key, url })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QrPollStatus {
    Pending,
    AwaitingConfirm,
    Expired,
    Success,
    Unknown,
}

fn classify_qr_code(code: i64) -> QrPollStatus {
    match code {
        86101 => QrPollStatus::Pending,
        86090 => QrPollStatus::AwaitingConfirm,
        86038 => QrPollStatus::Expired,
        0 => QrPollStatus::Success,
        _ => QrPollStatus::Unknown,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QrPollResult {
    pub status: QrPollStatus,
    pub account_id: Option<Uuid>,
}

/// Step 2-4 of QR login: poll, and on success capture cookies + buvid pair,
/// then upsert the account (spec §4.I).
pub async fn qr_poll(state: &AppState, qrcode_key: &str) -> Result<QrPollResult> {
    let client = anonymous_client(state);
    let envelope = client.qrcode_poll(qrcode_key).await;
    let code = envelope.data.get("code").and_then(|v| v.as_i64()).unwrap_or(-1);
    let status = classify_qr_code(code);

    if status != QrPollStatus::Success {
        return Ok(QrPollResult { status, account_id: None });
    }

    // SESSDATA/bili_jct/DedeUserID arrive as Set-Cookie headers on the poll
    // response, not as JSON fields (spec §4.I step 3).
    let sessdata = envelope.cookies.get("SESSDATA").cloned().unwrap_or_default();
    let bili_jct = envelope.cookies.get("bili_jct").cloned().unwrap_or_default();
    let dedeuserid = envelope.cookies.get("DedeUserID").cloned();
    let dedeuserid_ckmd5 = envelope.cookies.get("DedeUserID__ckMd5").cloned();
    let refresh_token = envelope.data.get("refresh_token").and_then(|v| v.as_str()).map(|s| s.to_string());
    let uid = dedeuserid.as_deref().and_then(|s| s.parse::<i64>().ok());

    if sessdata.is_empty() || bili_jct.is_empty() {
        return Err(OrchestratorError::PlatformTransient(
            "qr poll reported success but the response carried no SESSDATA/bili_jct cookies".to_string(),
        ));
    }

    let finger = client.finger_spi().await;
    let buvid3 = finger.data.get("b_3").and_then(|v| v.as_str()).map(|s| s.to_string());
    let buvid4 = finger.data.get("b_4").and_then(|v| v.as_str()).map(|s| s.to_string());

    let account_id = upsert_from_login(&state.db, uid, &sessdata, &bili_jct, dedeuserid_ckmd5, buvid3, buvid4, refresh_token).await?;

    Ok(QrPollResult { status, account_id: Some(account_id) })
}

#[allow(clippy::too_many_arguments)]
async fn upsert_from_login(
    db: &PgPool,
    uid: Option<i64>,
    sessdata: &str,
    bili_jct: &str,
    dedeuserid_ckmd5: Option<String>,
    buvid3: Option<String>,
    buvid4: Option<String>,
    refresh_token: Option<String>,
) -> Result<Uuid> {
    let existing: Option<Uuid> = match uid {
        Some(uid) => sqlx::query_scalar("SELECT id FROM accounts WHERE uid = $1").bind(uid).fetch_optional(db).await?,
        None => None,
    };

    let sessdata_enc = crate::crypto::encrypt(sessdata);
    let bili_jct_enc = crate::crypto::encrypt(bili_jct);
    let refresh_enc = refresh_token.as_deref().map(crate::crypto::encrypt);

    if let Some(account_id) = existing {
        sqlx::query(
            "UPDATE accounts SET sessdata = $1, bili_jct = $2, buvid3 = COALESCE($3, buvid3), \
             buvid4 = COALESCE($4, buvid4), dedeuserid_ckmd5 = COALESCE($5, dedeuserid_ckmd5), \
             refresh_token = COALESCE($6, refresh_token), status = 'valid', last_check_at = NOW() WHERE id = $7",
        )
        .bind(&sessdata_enc)
        .bind(&bili_jct_enc)
        .bind(&buvid3)
        .bind(&buvid4)
        .bind(&dedeuserid_ckmd5)
        .bind(&refresh_enc)
        .bind(account_id)
        .execute(db)
        .await?;
        Ok(account_id)
    } else {
        let name = uid.map(|u| format!("account-{u}")).unwrap_or_else(|| format!("account-{}", Uuid::new_v4()));
        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO accounts (name, sessdata, bili_jct, buvid3, buvid4, dedeuserid_ckmd5, refresh_token, uid, is_active, status, created_at, last_check_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true, 'valid', NOW(), NOW()) RETURNING id",
        )
        .bind(&name)
        .bind(&sessdata_enc)
        .bind(&bili_jct_enc)
        .bind(&buvid3)
        .bind(&buvid4)
        .bind(&dedeuserid_ckmd5)
        .bind(&refresh_enc)
        .bind(uid)
        .fetch_one(db)
        .await?;
        Ok(row.0)
    }
}

fn anonymous_client(state: &AppState) -> PlatformClient<'_> {
    PlatformClient::new(
        &state.http_client,
        state.clock.as_ref(),
        state.fingerprint.as_ref(),
        &state.wbi_cache,
        AccountCredentials { sessdata: String::new(), bili_jct: String::new(), buvid3: None, buvid4: None, dedeuserid_ckmd5: None, uid: None },
    )
}

fn bound_client<'a>(state: &'a AppState, account: &crate::models::AccountRow) -> PlatformClient<'a> {
    PlatformClient::new(
        &state.http_client,
        state.clock.as_ref(),
        state.fingerprint.as_ref(),
        &state.wbi_cache,
        AccountCredentials {
            sessdata: crate::crypto::decrypt(&account.sessdata).unwrap_or_else(|| account.sessdata.clone()),
            bili_jct: crate::crypto::decrypt(&account.bili_jct).unwrap_or_else(|| account.bili_jct.clone()),
            buvid3: account.buvid3.clone(),
            buvid4: account.buvid4.clone(),
            dedeuserid_ckmd5: account.dedeuserid_ckmd5.clone(),
            uid: account.uid,
        },
    )
}

/// Cookie-refresh handshake (spec §4.I). Returns `Ok(false)` when the
/// platform reports no refresh is needed — not an error.
pub async fn cookie_refresh(state: &AppState, account_id: Uuid) -> Result<bool> {
    let account = accounts::get_row(&state.db, account_id).await?;
    let client = bound_client(state, &account);

    let info = client.cookie_info().await;
    if classify(info.code) != Outcome::TerminalSuccess {
        return Err(OrchestratorError::PlatformTransient(format!("cookie/info failed: {}", info.message)));
    }
    let needs_refresh = info.data.get("refresh").and_then(|v| v.as_bool()).unwrap_or(false);
    if !needs_refresh {
        return Ok(false);
    }

    let timestamp_ms = state.clock.now_secs() * 1000;
    let html = client.correspond_page(timestamp_ms).await.map_err(|e| OrchestratorError::PlatformTransient(e.to_string()))?;
    let refresh_csrf = extract_refresh_csrf(&html)
        .ok_or_else(|| OrchestratorError::Internal("correspond page missing refresh_csrf nonce".to_string()))?;

    let refresh_token = account
        .refresh_token
        .as_deref()
        .and_then(crate::crypto::decrypt)
        .ok_or_else(|| OrchestratorError::Validation("account has no refresh_token on file".to_string()))?;

    let refreshed = client.cookie_refresh(&refresh_csrf, &refresh_token).await;
    if classify(refreshed.code) != Outcome::TerminalSuccess {
        return Err(OrchestratorError::PlatformTransient(format!("cookie/refresh failed: {}", refreshed.message)));
    }

    let new_refresh_token = refreshed.data.get("refresh_token").and_then(|v| v.as_str()).unwrap_or_default();
    // Like the QR poll, refreshed SESSDATA/bili_jct come back as Set-Cookie
    // headers, not JSON fields (spec §4.I step 3).
    let new_sessdata = refreshed.cookies.get("SESSDATA").cloned();
    let new_bili_jct = refreshed.cookies.get("bili_jct").cloned();
    let (new_sessdata, new_bili_jct) = match (new_sessdata, new_bili_jct) {
        (Some(s), Some(j)) if !s.is_empty() && !j.is_empty() => (s, j),
        _ => {
            return Err(OrchestratorError::PlatformTransient(
                "cookie/refresh succeeded but the response carried no new SESSDATA/bili_jct cookies".to_string(),
            ))
        }
    };

    let confirm = client.cookie_confirm(new_refresh_token).await;
    if classify(confirm.code) != Outcome::TerminalSuccess {
        tracing::warn!("cookie_refresh: confirm/refresh failed for account {account_id}: {}", confirm.message);
    }

    accounts::persist_refreshed_credentials(&state.db, account_id, &new_sessdata, &new_bili_jct, Some(new_refresh_token)).await?;
    Ok(true)
}

/// Extract the `refresh_csrf` nonce embedded in the correspond page HTML
/// (spec §4.I step 2 — "extract a nonce... by a fixed regex").
fn extract_refresh_csrf(html: &str) -> Option<String> {
    let re = Regex::new(r#"<div id="1-name">([0-9a-f]{32})</div>"#).ok()?;
    re.captures(html)?.get(1).map(|m| m.as_str().to_string())
}

/// Health sweep (spec §4.I): for each active account, check whether a
/// cookie refresh is needed and attempt it; on failure or absence of a
/// refresh token, mark `expiring`.
pub async fn health_sweep(state: &AppState) -> Result<()> {
    let accounts = accounts::list_active_valid(&state.db).await?;
    for account in accounts {
        match cookie_refresh(state, account.id).await {
            Ok(true) => {
                tracing::info!("health_sweep: refreshed cookies for account {}", account.id);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("health_sweep: refresh failed for account {}: {e}", account.id);
                accounts::mark_status(&state.db, account.id, AccountStatus::Expiring).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_qr_poll_codes() {
        assert_eq!(classify_qr_code(86101), QrPollStatus::Pending);
        assert_eq!(classify_qr_code(86090), QrPollStatus::AwaitingConfirm);
        assert_eq!(classify_qr_code(86038), QrPollStatus::Expired);
        assert_eq!(classify_qr_code(0), QrPollStatus::Success);
        assert_eq!(classify_qr_code(-1), QrPollStatus::Unknown);
    }

    #[test]
    fn extract_refresh_csrf_from_marker_div() {
        let html = r#"<html><body><div id="1-name">0123456789abcdef0123456789abcdef</div></body></html>"#;
        assert_eq!(extract_refresh_csrf(html), Some("0123456789abcdef0123456789abcdef".to_string()));
    }

    #[test]
    fn extract_refresh_csrf_missing_returns_none() {
        assert_eq!(extract_refresh_csrf("<html></html>"), None);
    }
}
