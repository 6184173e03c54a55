// ---------------------------------------------------------------------------
// handlers/cron.rs — bearer-secured training-data export.
// ---------------------------------------------------------------------------

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::{check_cron_token, CronAuth};
use crate::models::TrainingRow;
use crate::state::AppState;

use super::ApiError;

/// POST /api/cron/sync-training-data
///
/// Guarded by a constant-time comparison against CRON_SECRET. Exports
/// nothing unless the AI-learning consent flag is on; otherwise posts the
/// batch of unsynced rows to TRAINING_SINK_URL and stamps them synced.
/// Re-running after a successful export is a no-op.
pub async fn sync_training_data(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    match check_cron_token(auth_header, state.cron_secret.as_deref()) {
        CronAuth::Ok => {}
        CronAuth::Disabled => {
            return Err(ApiError::Unavailable("Cron endpoint is not configured".into()));
        }
        CronAuth::Invalid => {
            return Err(ApiError::Unauthorized("Invalid cron token".into()));
        }
    }

    // Consent gate — no consent, no export.
    let consent = sqlx::query_scalar::<_, bool>(
        "SELECT ai_learning_consent FROM ip_profile WHERE id = 1",
    )
    .fetch_optional(&state.db)
    .await?
    .unwrap_or(false);

    if !consent {
        tracing::info!("cron: training sync skipped — consent not granted");
        return Ok(Json(json!({ "skipped": true, "reason": "consent not granted" })));
    }

    let rows = sqlx::query_as::<_, TrainingRow>(
        "SELECT id, source, prompt, completion, created_at \
         FROM ip_training_data WHERE synced_at IS NULL ORDER BY created_at ASC",
    )
    .fetch_all(&state.db)
    .await?;

    if rows.is_empty() {
        return Ok(Json(json!({ "exported": 0 })));
    }

    let sink_url = std::env::var("TRAINING_SINK_URL")
        .ok()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::Unavailable("TRAINING_SINK_URL is not configured".into()))?;

    let resp = state
        .client
        .post(&sink_url)
        .json(&json!({ "samples": rows }))
        .timeout(std::time::Duration::from_secs(60))
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("Training sink request failed: {}", e)))?;

    if !resp.status().is_success() {
        return Err(ApiError::Upstream(format!(
            "Training sink returned {}",
            resp.status()
        )));
    }

    let ids: Vec<uuid::Uuid> = rows.iter().map(|r| r.id).collect();
    sqlx::query("UPDATE ip_training_data SET synced_at = NOW() WHERE id = ANY($1)")
        .bind(&ids)
        .execute(&state.db)
        .await?;

    tracing::info!(exported = rows.len(), "cron: training data synced");
    Ok(Json(json!({ "exported": rows.len() })))
}
