pub mod assistant;
pub mod auth;
pub mod handlers;
pub mod mcp;
pub mod models;
pub mod oauth;
pub mod provider;
pub mod state;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use state::AppState;

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // Public surface: probes + the cron endpoint (guarded by its own secret).
    let public = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/health/ready", get(handlers::readiness))
        .route("/api/cron/sync-training-data", post(handlers::sync_training_data));

    // Everything else requires the bearer secret when AUTH_SECRET is set.
    let protected = Router::new()
        // Email accounts + messages (provider dispatch)
        .route(
            "/api/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route("/api/accounts/{id}", axum::routing::delete(handlers::delete_account))
        .route(
            "/api/accounts/{id}/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route(
            "/api/accounts/{id}/messages/{message_id}",
            get(handlers::get_message),
        )
        // MCP integrations / connections / tools / purchases
        .route("/api/mcp/integrations", get(mcp::registry::list_integrations))
        .route(
            "/api/mcp/connections",
            get(mcp::registry::connection_list).post(mcp::registry::connection_create),
        )
        .route(
            "/api/mcp/connections/{id}",
            axum::routing::delete(mcp::registry::connection_delete),
        )
        .route("/api/mcp/connections/{id}/sync", post(mcp::registry::connection_sync))
        .route("/api/mcp/tools", get(mcp::registry::tool_list))
        .route(
            "/api/mcp/purchases",
            get(mcp::registry::purchase_list).post(mcp::registry::purchase_create),
        )
        // Assistant
        .route("/api/assistant/chat", post(assistant::chat))
        .route("/api/assistant/models", get(assistant::list_models))
        // Voice proxies
        .route("/api/voice/transcribe", post(handlers::transcribe))
        .route("/api/voice/synthesize", post(handlers::synthesize))
        // Consent
        .route(
            "/api/user/ai-learning-consent",
            get(handlers::get_consent).post(handlers::set_consent),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    public.merge(protected).with_state(state)
}
