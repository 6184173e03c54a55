// ---------------------------------------------------------------------------
// handlers/ — route handlers grouped by concern; mod.rs carries the shared
// ApiError type and re-exports so lib.rs routes stay short.
// ---------------------------------------------------------------------------

pub(crate) mod accounts;
pub(crate) mod consent;
pub(crate) mod cron;
pub(crate) mod email;
pub(crate) mod health;
pub(crate) mod voice;

pub use accounts::{create_account, delete_account, list_accounts};
pub use consent::{get_consent, set_consent};
pub use cron::sync_training_data;
pub use email::{get_message, list_messages, send_message};
pub use health::{health, readiness};
pub use voice::{synthesize, transcribe};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Centralized API error type for all handlers.
/// Logs full details server-side, returns sanitized JSON to the client:
/// `{ "error": "<message>" }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(format!("DB error: {}", e))
    }
}

impl From<crate::provider::ProviderError> for ApiError {
    fn from(e: crate::provider::ProviderError) -> Self {
        use crate::provider::ProviderError;
        match e {
            ProviderError::UnknownProvider(_) | ProviderError::MissingImapConfig(_) => {
                ApiError::BadRequest(e.to_string())
            }
            ProviderError::Auth(_) => ApiError::Upstream(e.to_string()),
            ProviderError::Vendor(_) | ProviderError::Backend(_) => {
                ApiError::Upstream(e.to_string())
            }
            ProviderError::AccountNotFound(_) | ProviderError::MessageNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
        }
    }
}
