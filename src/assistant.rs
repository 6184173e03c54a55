//! AI assistant backed by an Ollama-compatible inference endpoint.
//!
//! Exposes the synced MCP tool set to the model as callable functions:
//! tool calls returned by the model are dispatched through the MCP client
//! manager and their results fed back into the conversation.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::handlers::ApiError;
use crate::models::{ChatRequest, ChatResponse};
use crate::state::AppState;

/// Upper bound on model → tool → model round trips per request.
const MAX_TOOL_ROUNDS: usize = 4;

// ── Settings ────────────────────────────────────────────────────────────────

/// Read the inference base URL: OLLAMA_URL env overrides the stored setting.
async fn inference_url(state: &AppState) -> String {
    if let Ok(url) = std::env::var("OLLAMA_URL") {
        if !url.is_empty() {
            return url;
        }
    }
    sqlx::query_scalar::<_, String>("SELECT ollama_url FROM ip_settings WHERE id = 1")
        .fetch_optional(&state.db)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| "http://localhost:11434".to_string())
}

async fn default_model(state: &AppState) -> String {
    sqlx::query_scalar::<_, String>("SELECT assistant_model FROM ip_settings WHERE id = 1")
        .fetch_optional(&state.db)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| "llama3.1".to_string())
}

// ── Model discovery ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<TagModel>>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// GET /api/assistant/models — discover locally available models.
/// Returns an empty list (never an error) when the endpoint is unreachable —
/// inference is an optional provider.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let base = inference_url(&state).await;
    let tags_url = format!("{}/api/tags", base.trim_end_matches('/'));

    let resp = match state
        .client
        .get(&tags_url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
    {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            tracing::debug!("assistant: /api/tags returned {}", r.status());
            return Json(json!({ "models": [] }));
        }
        Err(e) => {
            tracing::debug!("assistant: inference endpoint not reachable at {}: {}", tags_url, e);
            return Json(json!({ "models": [] }));
        }
    };

    let body: TagsResponse = match resp.json().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("assistant: failed to parse /api/tags response: {}", e);
            return Json(json!({ "models": [] }));
        }
    };

    let models: Vec<String> = body
        .models
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.name)
        .collect();
    Json(json!({ "models": models }))
}

/// Probe used by the health endpoint (3s timeout).
pub async fn is_available(state: &AppState) -> bool {
    let base = inference_url(state).await;
    let tags_url = format!("{}/api/tags", base.trim_end_matches('/'));

    state
        .client
        .head(&tags_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
        .is_ok_and(|r| r.status().is_success())
}

// ── Chat ────────────────────────────────────────────────────────────────────

/// POST /api/assistant/chat
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".into()));
    }

    let started = std::time::Instant::now();
    let base = inference_url(&state).await;
    let chat_url = format!("{}/api/chat", base.trim_end_matches('/'));
    let model = match req.model {
        Some(m) if !m.is_empty() => m,
        _ => default_model(&state).await,
    };

    let mut messages: Vec<Value> = req
        .history
        .iter()
        .map(|t| json!({ "role": t.role, "content": t.content }))
        .collect();
    messages.push(json!({ "role": "user", "content": req.message }));

    let tools = build_tool_declarations(&state).await;
    let mut tool_call_count = 0u32;

    let reply = loop {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools.clone());
        }

        let resp = state
            .client
            .post(&chat_url)
            .json(&payload)
            .timeout(std::time::Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("Inference request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "Inference endpoint returned {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("Invalid inference response: {}", e)))?;

        let message = body["message"].clone();
        let tool_calls = message["tool_calls"].as_array().cloned().unwrap_or_default();

        if tool_calls.is_empty() || tool_call_count as usize >= MAX_TOOL_ROUNDS {
            break message["content"].as_str().unwrap_or_default().to_string();
        }

        // Feed the assistant turn (with its tool calls) back, then the results.
        messages.push(message.clone());
        for call in &tool_calls {
            tool_call_count += 1;
            let name = call["function"]["name"].as_str().unwrap_or_default();
            let args = call["function"]["arguments"].clone();

            let result = match state.mcp.call_tool(name, &args).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("assistant: tool '{}' failed: {}", name, e);
                    format!("Tool call failed: {}", e)
                }
            };
            messages.push(json!({ "role": "tool", "content": result }));
        }
    };

    record_training_exchange(&state, &req.message, &reply).await;

    Ok(Json(ChatResponse {
        reply,
        model,
        tool_calls: tool_call_count,
        duration_ms: started.elapsed().as_millis() as u64,
    }))
}

/// Translate the live MCP tool set into inference-endpoint function
/// declarations (OpenAI-style, as Ollama expects).
async fn build_tool_declarations(state: &AppState) -> Vec<Value> {
    state
        .mcp
        .list_all_tools()
        .await
        .iter()
        .map(|t| {
            let desc = t.description.as_deref().unwrap_or("External MCP tool");
            json!({
                "type": "function",
                "function": {
                    "name": t.prefixed_name,
                    "description": format!("[{}] {}", t.connection_name, desc),
                    "parameters": t.input_schema,
                }
            })
        })
        .collect()
}

/// Record a completed exchange as training data — only when the AI-learning
/// consent flag is on. Failures are logged and swallowed.
async fn record_training_exchange(state: &AppState, prompt: &str, completion: &str) {
    if completion.is_empty() {
        return;
    }

    let consent = sqlx::query_scalar::<_, bool>(
        "SELECT ai_learning_consent FROM ip_profile WHERE id = 1",
    )
    .fetch_optional(&state.db)
    .await
    .ok()
    .flatten()
    .unwrap_or(false);

    if !consent {
        return;
    }

    if let Err(e) = sqlx::query(
        "INSERT INTO ip_training_data (source, prompt, completion) VALUES ('assistant', $1, $2)",
    )
    .bind(prompt)
    .bind(completion)
    .execute(&state.db)
    .await
    {
        tracing::warn!("assistant: failed to record training exchange: {}", e);
    }
}
