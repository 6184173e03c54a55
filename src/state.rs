// Application state shared across all route handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use sqlx::PgPool;

use crate::mcp::client::McpClientManager;

/// Central application state. Clone-friendly — PgPool and Arc are both Clone.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub client: Client,
    pub start_time: Instant,
    /// `true` once the startup MCP sync finishes (or fails — it is best-effort).
    pub ready: Arc<AtomicBool>,
    /// Optional auth secret from AUTH_SECRET env. None = dev mode (no auth).
    pub auth_secret: Option<String>,
    /// Secret guarding the cron endpoint. None = cron disabled (503).
    pub cron_secret: Option<String>,
    /// Live MCP connections and their discovered tools.
    pub mcp: Arc<McpClientManager>,
}

impl AppState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
        tracing::info!("Backend marked as READY");
    }
}

impl AppState {
    pub async fn new(db: PgPool) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        let auth_secret = std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());
        if auth_secret.is_some() {
            tracing::info!("AUTH_SECRET configured — authentication enabled");
        } else {
            tracing::info!("AUTH_SECRET not set — authentication disabled (dev mode)");
        }

        let cron_secret = std::env::var("CRON_SECRET").ok().filter(|s| !s.is_empty());
        if cron_secret.is_none() {
            tracing::info!("CRON_SECRET not set — cron endpoint disabled");
        }

        let mcp = Arc::new(McpClientManager::new(db.clone(), client.clone()));

        Self {
            db,
            client,
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
            auth_secret,
            cron_secret,
            mcp,
        }
    }
}
