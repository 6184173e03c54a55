// ---------------------------------------------------------------------------
// handlers/health.rs — health + readiness probes
// ---------------------------------------------------------------------------

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::{HealthResponse, ProviderInfo};
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = vec![
        ProviderInfo {
            name: "ollama".to_string(),
            available: crate::assistant::is_available(&state).await,
        },
        ProviderInfo {
            name: "deepgram".to_string(),
            available: env_configured("DEEPGRAM_API_KEY"),
        },
        ProviderInfo {
            name: "elevenlabs".to_string(),
            available: env_configured("ELEVENLABS_API_KEY"),
        },
    ];

    Json(HealthResponse {
        status: if state.is_ready() { "ok" } else { "starting" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        app: "MailPilot".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        providers,
    })
}

/// GET /api/health/ready — lightweight readiness probe (no locks, no DB).
pub async fn readiness(State(state): State<AppState>) -> axum::response::Response {
    let ready = state.is_ready();
    let uptime = state.start_time.elapsed().as_secs();
    let body = json!({ "ready": ready, "uptime_seconds": uptime });

    if ready {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

fn env_configured(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty())
}
