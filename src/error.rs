// Jaskier Shared Pattern — error
// Crate-wide error taxonomy (spec §7).

use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("platform transient error: {0}")]
    PlatformTransient(String),

    #[error("platform risk control: {0}")]
    PlatformRisk(String),

    #[error("account not authenticated: {0}")]
    AuthInvalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => OrchestratorError::NotFound("row not found".to_string()),
            other => OrchestratorError::Internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            OrchestratorError::PlatformTransient(e.to_string())
        } else {
            OrchestratorError::Internal(e.to_string())
        }
    }
}

impl axum::response::IntoResponse for OrchestratorError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            OrchestratorError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OrchestratorError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            OrchestratorError::PlatformTransient(_) => (StatusCode::BAD_GATEWAY, "platform_transient"),
            OrchestratorError::PlatformRisk(_) => (StatusCode::BAD_GATEWAY, "platform_risk"),
            OrchestratorError::AuthInvalid(_) => (StatusCode::UNAUTHORIZED, "auth_invalid"),
            OrchestratorError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        (status, Json(json!({ "error": code, "message": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
