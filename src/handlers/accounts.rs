// ---------------------------------------------------------------------------
// handlers/accounts.rs — email account registry (list / create / delete)
// ---------------------------------------------------------------------------

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{CreateAccountRequest, EmailAccount};
use crate::state::AppState;

use super::ApiError;

/// GET /api/accounts
pub async fn list_accounts(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let accounts = sqlx::query_as::<_, EmailAccount>(
        "SELECT id, email, display_name, provider, created_at, updated_at \
         FROM ip_email_accounts ORDER BY created_at ASC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(json!({ "accounts": accounts })))
}

/// POST /api/accounts
pub async fn create_account(
    State(state): State<AppState>,
    Json(body): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let email = body.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email address is required".into()));
    }

    match body.provider.as_str() {
        "gmail" | "outlook" => {
            if body.access_token.as_deref().unwrap_or("").is_empty() {
                return Err(ApiError::BadRequest(format!(
                    "Provider '{}' requires an access_token",
                    body.provider
                )));
            }
        }
        "imap" => {
            if body.imap.is_none() {
                return Err(ApiError::BadRequest(
                    "Provider 'imap' requires imap connection settings".into(),
                ));
            }
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unknown email provider '{}'",
                other
            )));
        }
    }

    // Secrets are encrypted before they touch the DB.
    let access_token = body
        .access_token
        .as_deref()
        .map(crate::oauth::encrypt_token)
        .unwrap_or_default();
    let refresh_token = body
        .refresh_token
        .as_deref()
        .map(crate::oauth::encrypt_token)
        .unwrap_or_default();

    let imap_json = match body.imap {
        Some(mut settings) => {
            settings.password = crate::oauth::encrypt_token(&settings.password);
            Some(serde_json::to_string(&settings).map_err(|e| ApiError::Internal(e.to_string()))?)
        }
        None => None,
    };
    let smtp_json = match body.smtp {
        Some(mut settings) => {
            settings.password = crate::oauth::encrypt_token(&settings.password);
            Some(serde_json::to_string(&settings).map_err(|e| ApiError::Internal(e.to_string()))?)
        }
        None => None,
    };

    let account = sqlx::query_as::<_, EmailAccount>(
        "INSERT INTO ip_email_accounts \
         (email, display_name, provider, access_token, refresh_token, token_expires_at, imap_config, smtp_config) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING id, email, display_name, provider, created_at, updated_at",
    )
    .bind(email)
    .bind(body.display_name.as_deref().unwrap_or(""))
    .bind(&body.provider)
    .bind(&access_token)
    .bind(&refresh_token)
    .bind(body.token_expires_at.unwrap_or(0))
    .bind(&imap_json)
    .bind(&smtp_json)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::BadRequest(format!("An account for '{}' already exists", email))
        }
        _ => ApiError::from(e),
    })?;

    tracing::info!(account = %account.id, provider = %account.provider, "account created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(&account).unwrap_or_default()),
    ))
}

/// DELETE /api/accounts/{id}
pub async fn delete_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let result = sqlx::query("DELETE FROM ip_email_accounts WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Account not found".into()));
    }
    tracing::info!(account = %id, "account deleted");
    Ok(Json(json!({ "deleted": true })))
}
