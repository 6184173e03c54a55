// ---------------------------------------------------------------------------
// handlers/email.rs — message routes; each resolves the account, runs the
// provider dispatch, and delegates to the selected backend.
// ---------------------------------------------------------------------------

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{ListMessagesQuery, OutgoingMessage};
use crate::provider::create_email_provider;
use crate::state::AppState;

use super::ApiError;

const DEFAULT_PAGE_SIZE: usize = 25;
const MAX_PAGE_SIZE: usize = 100;
const MAX_PAGE: usize = 100_000;

/// Clamp user-supplied paging so downstream offset math (`page * page_size`)
/// stays far from overflow.
fn clamp_paging(page: Option<usize>, page_size: Option<usize>) -> (usize, usize) {
    let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    (page, page_size)
}

/// GET /api/accounts/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Value>, ApiError> {
    let (page, page_size) = clamp_paging(query.page, query.page_size);

    let provider = create_email_provider(&state, &id).await?;
    let envelopes = provider
        .list_messages(query.folder.as_deref(), page, page_size)
        .await?;

    Ok(Json(json!({
        "messages": envelopes,
        "page": page,
        "page_size": page_size,
    })))
}

/// GET /api/accounts/{id}/messages/{message_id}
pub async fn get_message(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(Uuid, String)>,
) -> Result<Json<Value>, ApiError> {
    let provider = create_email_provider(&state, &id).await?;
    let message = provider.get_message(&message_id).await?;
    Ok(Json(serde_json::to_value(&message).unwrap_or_default()))
}

/// POST /api/accounts/{id}/messages — send.
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(outgoing): Json<OutgoingMessage>,
) -> Result<Json<Value>, ApiError> {
    if outgoing.to.is_empty() {
        return Err(ApiError::BadRequest("At least one recipient is required".into()));
    }
    if outgoing.to.iter().chain(outgoing.cc.iter()).any(|a| !a.contains('@')) {
        return Err(ApiError::BadRequest("Recipient addresses must be valid".into()));
    }

    let provider = create_email_provider(&state, &id).await?;
    provider.send_message(&outgoing).await?;

    Ok(Json(json!({ "sent": true })))
}
