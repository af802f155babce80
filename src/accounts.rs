// Jaskier Shared Pattern — accounts
// Credential Store (spec §4.A): CRUD over the accounts table, public vs.
// credentialed projections, credential-mutation → status-reset invariant.

use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto;
use crate::error::{OrchestratorError, Result};
use crate::models::{
    AccountCredentialed, AccountPublic, AccountRow, AccountStatus, CreateAccountRequest,
    UpdateAccountRequest,
};

pub async fn create(db: &PgPool, req: CreateAccountRequest) -> Result<AccountRow> {
    if req.name.trim().is_empty() {
        return Err(OrchestratorError::Validation("name must not be empty".to_string()));
    }
    if req.sessdata.trim().is_empty() || req.bili_jct.trim().is_empty() {
        return Err(OrchestratorError::Validation("sessdata and bili_jct are required".to_string()));
    }

    let row = sqlx::query_as::<_, AccountRow>(
        "INSERT INTO accounts \
         (name, sessdata, bili_jct, buvid3, buvid4, dedeuserid_ckmd5, refresh_token, uid, group_tag, is_active, status, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true, 'unknown', NOW()) \
         RETURNING *",
    )
    .bind(&req.name)
    .bind(crypto::encrypt(&req.sessdata))
    .bind(crypto::encrypt(&req.bili_jct))
    .bind(&req.buvid3)
    .bind(&req.buvid4)
    .bind(&req.dedeuserid_ckmd5)
    .bind(req.refresh_token.as_ref().map(|t| crypto::encrypt(t)))
    .bind(req.uid)
    .bind(&req.group_tag)
    .fetch_one(db)
    .await?;

    Ok(row)
}

pub async fn get_row(db: &PgPool, id: Uuid) -> Result<AccountRow> {
    sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(OrchestratorError::NotFound("account not found".to_string()))
}

pub async fn get_public(db: &PgPool, id: Uuid) -> Result<AccountPublic> {
    let row = get_row(db, id).await?;
    Ok(AccountPublic::from(&row))
}

/// Returned only on explicit authenticated request (spec §4.A). Caller is
/// responsible for attaching no-store cache directives to the response.
pub async fn get_credentialed(db: &PgPool, id: Uuid) -> Result<AccountCredentialed> {
    let row = get_row(db, id).await?;
    let mut credentialed = AccountCredentialed::from(&row);
    credentialed.sessdata = crypto::decrypt(&credentialed.sessdata).unwrap_or(credentialed.sessdata);
    credentialed.bili_jct = crypto::decrypt(&credentialed.bili_jct).unwrap_or(credentialed.bili_jct);
    if let Some(token) = credentialed.refresh_token.as_ref() {
        credentialed.refresh_token = crypto::decrypt(token).or(Some(token.clone()));
    }
    Ok(credentialed)
}

pub async fn list_public(db: &PgPool, limit: i64, offset: i64) -> Result<Vec<AccountPublic>> {
    let rows = sqlx::query_as::<_, AccountRow>(
        "SELECT * FROM accounts ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit.clamp(1, 500))
    .bind(offset.max(0))
    .fetch_all(db)
    .await?;

    Ok(rows.iter().map(AccountPublic::from).collect())
}

/// Accounts eligible for dispatch/inbox work: active and in a usable status.
pub async fn list_active_valid(db: &PgPool) -> Result<Vec<AccountRow>> {
    let rows = sqlx::query_as::<_, AccountRow>(
        "SELECT * FROM accounts WHERE is_active = true AND status IN ('valid', 'expiring') ORDER BY created_at",
    )
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn update(db: &PgPool, id: Uuid, req: UpdateAccountRequest) -> Result<AccountRow> {
    let current = get_row(db, id).await?;
    let touches_credentials = req.touches_credentials();

    let name = req.name.unwrap_or(current.name);
    let sessdata = req.sessdata.map(|s| crypto::encrypt(&s)).unwrap_or(current.sessdata);
    let bili_jct = req.bili_jct.map(|s| crypto::encrypt(&s)).unwrap_or(current.bili_jct);
    let buvid3 = req.buvid3.or(current.buvid3);
    let buvid4 = req.buvid4.or(current.buvid4);
    let dedeuserid_ckmd5 = req.dedeuserid_ckmd5.or(current.dedeuserid_ckmd5);
    let refresh_token = req
        .refresh_token
        .map(|s| crypto::encrypt(&s))
        .or(current.refresh_token);
    let group_tag = req.group_tag.or(current.group_tag);
    let is_active = req.is_active.unwrap_or(current.is_active);

    let (status, last_check_at) = if touches_credentials {
        (AccountStatus::Unknown.as_str().to_string(), None)
    } else {
        (current.status, current.last_check_at)
    };

    let row = sqlx::query_as::<_, AccountRow>(
        "UPDATE accounts SET name = $1, sessdata = $2, bili_jct = $3, buvid3 = $4, buvid4 = $5, \
         dedeuserid_ckmd5 = $6, refresh_token = $7, group_tag = $8, is_active = $9, status = $10, \
         last_check_at = $11 WHERE id = $12 RETURNING *",
    )
    .bind(name)
    .bind(sessdata)
    .bind(bili_jct)
    .bind(buvid3)
    .bind(buvid4)
    .bind(dedeuserid_ckmd5)
    .bind(refresh_token)
    .bind(group_tag)
    .bind(is_active)
    .bind(status)
    .bind(last_check_at)
    .bind(id)
    .fetch_one(db)
    .await?;

    Ok(row)
}

pub async fn mark_status(db: &PgPool, id: Uuid, status: AccountStatus) -> Result<()> {
    sqlx::query("UPDATE accounts SET status = $1, last_check_at = NOW() WHERE id = $2")
        .bind(status.as_str())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Persist freshly captured session credentials after a login/refresh
/// handshake, resetting status to `valid` and stamping last-check (spec §4.I).
pub async fn persist_refreshed_credentials(
    db: &PgPool,
    id: Uuid,
    sessdata: &str,
    bili_jct: &str,
    refresh_token: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE accounts SET sessdata = $1, bili_jct = $2, refresh_token = COALESCE($3, refresh_token), \
         status = 'valid', last_check_at = NOW() WHERE id = $4",
    )
    .bind(crypto::encrypt(sessdata))
    .bind(crypto::encrypt(bili_jct))
    .bind(refresh_token.map(crypto::encrypt))
    .bind(id)
    .execute(db)
    .await?;
    Ok(())
}

/// Delete is cascade-free (spec §4.A) — report_logs keep a nullable FK.
pub async fn delete(db: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM accounts WHERE id = $1").bind(id).execute(db).await?;
    if result.rows_affected() == 0 {
        return Err(OrchestratorError::NotFound("account not found".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentialed_projection_carries_secrets() {
        let row = AccountRow {
            id: Uuid::new_v4(),
            name: "demo".to_string(),
            sessdata: "s".to_string(),
            bili_jct: "j".to_string(),
            buvid3: None,
            buvid4: None,
            dedeuserid_ckmd5: None,
            refresh_token: None,
            uid: Some(42),
            group_tag: None,
            is_active: true,
            status: "valid".to_string(),
            last_check_at: None,
            created_at: chrono::Utc::now(),
        };
        let credentialed = AccountCredentialed::from(&row);
        assert_eq!(credentialed.sessdata, "s");
        let public = AccountPublic::from(&row);
        assert_eq!(public.uid, Some(42));
    }
}
