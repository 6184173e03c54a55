use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;

use mailpilot_backend::state::AppState;

/// Helper: build a fresh AppState backed by a test Postgres database.
/// Returns None when DATABASE_URL is not set (CI without DB).
async fn try_test_state() -> Option<AppState> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => return None,
    };
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    let mut state = AppState::new(pool).await;
    // Deterministic regardless of the host environment: auth off, cron off.
    state.auth_secret = None;
    state.cron_secret = None;
    Some(state)
}

/// Convenience macro: skip the test when DATABASE_URL is absent.
macro_rules! require_db {
    () => {
        match try_test_state().await {
            Some(s) => s,
            None => {
                eprintln!("Skipping: DATABASE_URL not set");
                return;
            }
        }
    };
}

/// Helper: build a router from a test state.
fn app(state: AppState) -> axum::Router {
    mailpilot_backend::create_router(state)
}

/// Helper: collect a response body into a serde_json::Value.
async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
//  GET /api/health
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn health_returns_200() {
    let state = require_db!();
    let response = app(state).oneshot(get("/api/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_has_correct_fields() {
    let state = require_db!();
    let response = app(state).oneshot(get("/api/health")).await.unwrap();

    let json = body_json(response).await;

    // test_state() does not call mark_ready(), so status is "starting"
    assert_eq!(json["status"], "starting");
    assert_eq!(json["version"], "1.2.0");
    assert_eq!(json["app"], "MailPilot");
    assert!(json["uptime_seconds"].is_u64());
    assert!(json["providers"].is_array());
}

// ═══════════════════════════════════════════════════════════════════════════
//  GET /api/health/ready
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn readiness_is_503_until_marked_ready() {
    let state = require_db!();

    let response = app(state.clone())
        .oneshot(get("/api/health/ready"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.mark_ready();

    let response = app(state).oneshot(get("/api/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["ready"], true);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Bearer auth on protected routes
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn protected_route_requires_token_when_secret_set() {
    let mut state = require_db!();
    state.auth_secret = Some("test-secret".to_string());

    // No Authorization header
    let response = app(state.clone()).oneshot(get("/api/accounts")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong token
    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/accounts")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct token
    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/api/accounts")
                .header("authorization", "Bearer test-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_is_public_even_with_secret_set() {
    let mut state = require_db!();
    state.auth_secret = Some("test-secret".to_string());

    let response = app(state).oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ═══════════════════════════════════════════════════════════════════════════
//  GET/POST /api/user/ai-learning-consent
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn consent_defaults_to_false_and_round_trips() {
    let state = require_db!();

    // Clear any previous state so the default is observable.
    sqlx::query("DELETE FROM ip_profile WHERE id = 1")
        .execute(&state.db)
        .await
        .unwrap();

    let response = app(state.clone())
        .oneshot(get("/api/user/ai-learning-consent"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["consent"], false);

    let response = app(state.clone())
        .oneshot(post_json(
            "/api/user/ai-learning-consent",
            &serde_json::json!({ "consent": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(state)
        .oneshot(get("/api/user/ai-learning-consent"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["consent"], true);
}

#[tokio::test]
async fn consent_set_is_idempotent() {
    let state = require_db!();

    for _ in 0..2 {
        let response = app(state.clone())
            .oneshot(post_json(
                "/api/user/ai-learning-consent",
                &serde_json::json!({ "consent": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["consent"], false);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  POST /api/cron/sync-training-data
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cron_is_503_when_secret_not_configured() {
    let state = require_db!();
    let response = app(state)
        .oneshot(post_json("/api/cron/sync-training-data", &serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn cron_rejects_bad_token() {
    let mut state = require_db!();
    state.cron_secret = Some("cron-secret".to_string());

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cron/sync-training-data")
                .header("authorization", "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cron_skips_export_without_consent() {
    let mut state = require_db!();
    state.cron_secret = Some("cron-secret".to_string());

    sqlx::query(
        "INSERT INTO ip_profile (id, ai_learning_consent) VALUES (1, false) \
         ON CONFLICT (id) DO UPDATE SET ai_learning_consent = false",
    )
    .execute(&state.db)
    .await
    .unwrap();

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cron/sync-training-data")
                .header("authorization", "Bearer cron-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["skipped"], true);
}

// ═══════════════════════════════════════════════════════════════════════════
//  /api/accounts — validation
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn list_accounts_returns_array() {
    let state = require_db!();
    let response = app(state).oneshot(get("/api/accounts")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["accounts"].is_array());
}

#[tokio::test]
async fn create_account_rejects_unknown_provider() {
    let state = require_db!();
    let body = serde_json::json!({
        "email": "someone@example.com",
        "provider": "pigeon"
    });
    let response = app(state)
        .oneshot(post_json("/api/accounts", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("pigeon"));
}

#[tokio::test]
async fn create_account_rejects_invalid_email() {
    let state = require_db!();
    let body = serde_json::json!({
        "email": "not-an-email",
        "provider": "gmail",
        "access_token": "tok"
    });
    let response = app(state)
        .oneshot(post_json("/api/accounts", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_imap_account_requires_connection_settings() {
    let state = require_db!();
    let body = serde_json::json!({
        "email": "user@example.com",
        "provider": "imap"
    });
    let response = app(state)
        .oneshot(post_json("/api/accounts", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_gmail_account_requires_access_token() {
    let state = require_db!();
    let body = serde_json::json!({
        "email": "user@gmail.com",
        "provider": "gmail"
    });
    let response = app(state)
        .oneshot(post_json("/api/accounts", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_and_delete_imap_account() {
    let state = require_db!();

    let email = format!("roundtrip-{}@example.com", uuid::Uuid::new_v4());
    let body = serde_json::json!({
        "email": email,
        "provider": "imap",
        "imap": { "host": "mail.example.com", "port": 993, "username": email, "password": "pw" },
        "smtp": { "host": "mail.example.com", "port": 465, "username": email, "password": "pw" }
    });
    let response = app(state.clone())
        .oneshot(post_json("/api/accounts", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["provider"], "imap");
    // Token columns must never appear in API responses.
    assert!(json.get("access_token").is_none());
    assert!(json.get("imap_config").is_none());
    let id = json["id"].as_str().unwrap().to_string();

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/accounts/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["deleted"], true);
}

#[tokio::test]
async fn imap_account_without_stored_config_fails_dispatch() {
    let state = require_db!();

    // Creation-time validation refuses this shape, but the column is
    // nullable — a row can predate validation. Dispatch must reject it.
    let email = format!("no-config-{}@example.com", uuid::Uuid::new_v4());
    let id = sqlx::query_scalar::<_, uuid::Uuid>(
        "INSERT INTO ip_email_accounts (email, provider) VALUES ($1, 'imap') RETURNING id",
    )
    .bind(&email)
    .fetch_one(&state.db)
    .await
    .unwrap();

    let response = app(state.clone())
        .oneshot(get(&format!("/api/accounts/{}/messages", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("IMAP"));

    sqlx::query("DELETE FROM ip_email_accounts WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await
        .unwrap();
}

#[tokio::test]
async fn messages_for_unknown_account_return_404() {
    let state = require_db!();
    let response = app(state)
        .oneshot(get(&format!(
            "/api/accounts/{}/messages",
            uuid::Uuid::new_v4()
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_unknown_account_returns_404() {
    let state = require_db!();
    let response = app(state)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/accounts/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ═══════════════════════════════════════════════════════════════════════════
//  /api/mcp — integrations / connections / purchases
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn mcp_integrations_lists_seeded_catalog() {
    let state = require_db!();
    let response = app(state).oneshot(get("/api/mcp/integrations")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let integrations = json["integrations"].as_array().unwrap();
    let slugs: Vec<&str> = integrations
        .iter()
        .filter_map(|i| i["slug"].as_str())
        .collect();
    assert!(slugs.contains(&"odoo"));
    assert!(slugs.contains(&"prestashop"));
    assert!(slugs.contains(&"custom"));
}

#[tokio::test]
async fn mcp_connection_create_validates_input() {
    let state = require_db!();

    let integration_id = sqlx::query_scalar::<_, uuid::Uuid>(
        "SELECT id FROM ip_mcp_integrations WHERE slug = 'custom'",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();

    // Invalid URL
    let response = app(state.clone())
        .oneshot(post_json(
            "/api/mcp/connections",
            &serde_json::json!({
                "integration_id": integration_id,
                "name": "my server",
                "url": "not a url"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing name
    let response = app(state)
        .oneshot(post_json(
            "/api/mcp/connections",
            &serde_json::json!({
                "integration_id": integration_id,
                "name": "",
                "url": "http://localhost:9999/mcp"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn paid_integration_requires_purchase_before_connecting() {
    let state = require_db!();

    let integration_id = sqlx::query_scalar::<_, uuid::Uuid>(
        "SELECT id FROM ip_mcp_integrations WHERE slug = 'prestashop'",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();

    // Make sure no purchase is on record for this integration.
    sqlx::query("DELETE FROM ip_integration_purchases WHERE integration_id = $1")
        .bind(integration_id)
        .execute(&state.db)
        .await
        .unwrap();

    let response = app(state)
        .oneshot(post_json(
            "/api/mcp/connections",
            &serde_json::json!({
                "integration_id": integration_id,
                "name": "shop",
                "url": "http://localhost:9999/mcp"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unpaid_integration_connects_without_purchase() {
    let state = require_db!();

    let integration_id = sqlx::query_scalar::<_, uuid::Uuid>(
        "SELECT id FROM ip_mcp_integrations WHERE slug = 'custom'",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();

    // Disabled so background syncs never try to reach the placeholder URL.
    let response = app(state.clone())
        .oneshot(post_json(
            "/api/mcp/connections",
            &serde_json::json!({
                "integration_id": integration_id,
                "name": "my server",
                "url": "http://localhost:9999/mcp",
                "enabled": false
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert!(json.get("auth_token").is_none(), "auth_token must never serialize");
    let id = json["id"].as_str().unwrap().to_string();

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/mcp/connections/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn discovered_tools_replace_all_is_idempotent() {
    let state = require_db!();

    let integration_id = sqlx::query_scalar::<_, uuid::Uuid>(
        "SELECT id FROM ip_mcp_integrations WHERE slug = 'custom'",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();

    let connection_id = sqlx::query_scalar::<_, uuid::Uuid>(
        "INSERT INTO ip_mcp_connections (integration_id, name, url, enabled) \
         VALUES ($1, 'tool-store', 'http://localhost:9999/mcp', FALSE) RETURNING id",
    )
    .bind(integration_id)
    .fetch_one(&state.db)
    .await
    .unwrap();

    let count = |db: sqlx::PgPool, id: uuid::Uuid| async move {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ip_mcp_tools WHERE connection_id = $1",
        )
        .bind(id)
        .fetch_one(&db)
        .await
        .unwrap()
    };

    let tools = vec![
        ("ping".to_string(), Some("Liveness check".to_string()), "{}".to_string()),
        ("echo".to_string(), None, "{}".to_string()),
    ];

    mailpilot_backend::mcp::registry::save_discovered_tools(&state.db, &connection_id, &tools)
        .await
        .unwrap();
    assert_eq!(count(state.db.clone(), connection_id).await, 2);

    // Re-running with the same set leaves the count unchanged.
    mailpilot_backend::mcp::registry::save_discovered_tools(&state.db, &connection_id, &tools)
        .await
        .unwrap();
    assert_eq!(count(state.db.clone(), connection_id).await, 2);

    // A shrunken set removes stale rows.
    let shrunk = vec![("ping".to_string(), None, "{}".to_string())];
    mailpilot_backend::mcp::registry::save_discovered_tools(&state.db, &connection_id, &shrunk)
        .await
        .unwrap();
    assert_eq!(count(state.db.clone(), connection_id).await, 1);
    let remaining = sqlx::query_scalar::<_, String>(
        "SELECT tool_name FROM ip_mcp_tools WHERE connection_id = $1",
    )
    .bind(connection_id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(remaining, "ping");

    // Cascade cleans up the tool rows.
    sqlx::query("DELETE FROM ip_mcp_connections WHERE id = $1")
        .bind(connection_id)
        .execute(&state.db)
        .await
        .unwrap();
}

#[tokio::test]
async fn mcp_tools_returns_array() {
    let state = require_db!();
    let response = app(state).oneshot(get("/api/mcp/tools")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["tools"].is_array());
}

#[tokio::test]
async fn mcp_purchase_create_is_idempotent() {
    let state = require_db!();

    let integration_id = sqlx::query_scalar::<_, uuid::Uuid>(
        "SELECT id FROM ip_mcp_integrations WHERE slug = 'odoo'",
    )
    .fetch_one(&state.db)
    .await
    .unwrap();

    for _ in 0..2 {
        let response = app(state.clone())
            .oneshot(post_json(
                "/api/mcp/purchases",
                &serde_json::json!({ "integration_id": integration_id }),
            ))
            .await
            .unwrap();
        assert!(
            response.status() == StatusCode::OK || response.status() == StatusCode::CREATED,
            "unexpected status {}",
            response.status()
        );
    }

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM ip_integration_purchases WHERE integration_id = $1",
    )
    .bind(integration_id)
    .fetch_one(&state.db)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Voice proxies — unconfigured keys
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn transcribe_rejects_empty_body() {
    let state = require_db!();
    if std::env::var("DEEPGRAM_API_KEY").is_err() {
        eprintln!("Skipping: DEEPGRAM_API_KEY not set");
        return;
    }
    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/voice/transcribe")
                .header("content-type", "audio/wav")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ═══════════════════════════════════════════════════════════════════════════
//  404 for unknown routes
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unknown_route_returns_404() {
    let state = require_db!();
    let response = app(state).oneshot(get("/api/nonexistent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
