// ---------------------------------------------------------------------------
// handlers/voice.rs — thin proxies over the transcription (Deepgram) and
// speech-synthesis (ElevenLabs) vendor APIs.
// ---------------------------------------------------------------------------

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::models::SynthesizeRequest;
use crate::state::AppState;

use super::ApiError;

const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen?model=nova-2&smart_format=true";
const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// POST /api/voice/transcribe — raw audio body in, transcript out.
pub async fn transcribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let api_key = std::env::var("DEEPGRAM_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::Unavailable("Transcription is not configured".into()))?;

    if body.is_empty() {
        return Err(ApiError::BadRequest("Audio body is empty".into()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/wav")
        .to_string();

    let resp = state
        .client
        .post(DEEPGRAM_URL)
        .header("Authorization", format!("Token {}", api_key))
        .header("Content-Type", content_type)
        .body(body)
        .timeout(std::time::Duration::from_secs(60))
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("Transcription request failed: {}", e)))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let detail = resp.text().await.unwrap_or_default();
        tracing::error!("deepgram returned {}: {}", status, detail);
        return Err(ApiError::Upstream(format!("Transcription vendor returned {}", status)));
    }

    let result: Value = resp
        .json()
        .await
        .map_err(|e| ApiError::Upstream(format!("Invalid transcription response: {}", e)))?;

    let transcript = result
        .pointer("/results/channels/0/alternatives/0/transcript")
        .and_then(|t| t.as_str())
        .unwrap_or_default();

    Ok(Json(json!({ "transcript": transcript })))
}

/// POST /api/voice/synthesize — text in, audio bytes out (vendor content type
/// passed through).
pub async fn synthesize(
    State(state): State<AppState>,
    Json(req): Json<SynthesizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let api_key = std::env::var("ELEVENLABS_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::Unavailable("Speech synthesis is not configured".into()))?;

    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Text cannot be empty".into()));
    }

    let voice_id = match req.voice_id {
        Some(v) if !v.is_empty() => v,
        _ => default_voice(&state).await,
    };

    let resp = state
        .client
        .post(format!("{}/{}", ELEVENLABS_URL, voice_id))
        .header("xi-api-key", api_key)
        .json(&json!({
            "text": req.text,
            "model_id": "eleven_multilingual_v2",
        }))
        .timeout(std::time::Duration::from_secs(60))
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("Synthesis request failed: {}", e)))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let detail = resp.text().await.unwrap_or_default();
        tracing::error!("elevenlabs returned {}: {}", status, detail);
        return Err(ApiError::Upstream(format!("Synthesis vendor returned {}", status)));
    }

    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/mpeg")
        .to_string();

    let audio = resp
        .bytes()
        .await
        .map_err(|e| ApiError::Upstream(format!("Failed to read synthesis audio: {}", e)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        audio,
    ))
}

async fn default_voice(state: &AppState) -> String {
    sqlx::query_scalar::<_, String>("SELECT voice_id FROM ip_settings WHERE id = 1")
        .fetch_optional(&state.db)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| "21m00Tcm4TlvDq8ikWAM".to_string())
}
