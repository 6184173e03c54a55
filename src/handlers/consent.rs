// ---------------------------------------------------------------------------
// handlers/consent.rs — AI-learning consent flag. Gates training-data export.
// ---------------------------------------------------------------------------

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::models::ConsentRequest;
use crate::state::AppState;

use super::ApiError;

/// GET /api/user/ai-learning-consent
pub async fn get_consent(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let consent = sqlx::query_scalar::<_, bool>(
        "SELECT ai_learning_consent FROM ip_profile WHERE id = 1",
    )
    .fetch_optional(&state.db)
    .await?
    .unwrap_or(false);

    Ok(Json(json!({ "consent": consent })))
}

/// POST /api/user/ai-learning-consent — idempotent upsert.
pub async fn set_consent(
    State(state): State<AppState>,
    Json(body): Json<ConsentRequest>,
) -> Result<Json<Value>, ApiError> {
    sqlx::query(
        "INSERT INTO ip_profile (id, ai_learning_consent, updated_at) \
         VALUES (1, $1, NOW()) \
         ON CONFLICT (id) DO UPDATE SET ai_learning_consent = $1, updated_at = NOW()",
    )
    .bind(body.consent)
    .execute(&state.db)
    .await?;

    tracing::info!(consent = body.consent, "AI-learning consent updated");
    Ok(Json(json!({ "consent": body.consent })))
}
