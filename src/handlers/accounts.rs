// Jaskier Shared Pattern — handlers::accounts
// Account CRUD surface (SPEC_FULL.md §10.F), mirroring the public/credentialed
// projection split of spec.md §4.A. Grounded in service_tokens.rs's
// list/store/delete triad.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::accounts;
use crate::credential_lifecycle;
use crate::error::Result;
use crate::models::{CreateAccountRequest, UpdateAccountRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>> {
    let rows = accounts::list_public(&state.db, q.limit.unwrap_or(50), q.offset.unwrap_or(0)).await?;
    Ok(Json(serde_json::json!({ "accounts": rows })))
}

pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let row = accounts::create(&state.db, req).await?;
    tracing::info!("account created: {}", row.id);
    Ok((StatusCode::CREATED, Json(serde_json::json!(crate::models::AccountPublic::from(&row)))))
}

pub async fn get_account(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>> {
    let account = accounts::get_public(&state.db, id).await?;
    Ok(Json(serde_json::json!(account)))
}

/// Returns decrypted credentials. Only reachable behind the same bearer-auth
/// middleware as every other protected route; response carries a `no-store`
/// cache directive so a caching proxy never retains it (spec §4.A).
pub async fn get_account_credentials(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Response> {
    let account = accounts::get_credentialed(&state.db, id).await?;
    let mut response = Json(serde_json::json!(account)).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

pub async fn update_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Json<serde_json::Value>> {
    let row = accounts::update(&state.db, id, req).await?;
    Ok(Json(serde_json::json!(crate::models::AccountPublic::from(&row))))
}

pub async fn delete_account(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    accounts::delete(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Credential lifecycle admin surface (spec §4.I) ───────────────────────

pub async fn qr_login_generate(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let session = credential_lifecycle::qr_generate(&state).await?;
    Ok(Json(serde_json::json!(session)))
}

#[derive(Debug, Deserialize)]
pub struct QrPollQuery {
    pub qrcode_key: String,
}

pub async fn qr_login_poll(
    State(state): State<AppState>,
    Query(q): Query<QrPollQuery>,
) -> Result<Json<serde_json::Value>> {
    let result = credential_lifecycle::qr_poll(&state, &q.qrcode_key).await?;
    Ok(Json(serde_json::json!(result)))
}

/// Force an out-of-band cookie refresh for one account (spec §4.I), outside
/// the periodic health sweep.
pub async fn refresh_account(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>> {
    let refreshed = credential_lifecycle::cookie_refresh(&state, id).await?;
    Ok(Json(serde_json::json!({ "account_id": id, "refreshed": refreshed })))
}
