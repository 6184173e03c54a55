//! MCP integration registry: catalog, connections, purchases, discovered
//! tools, and the best-effort sync that runs before catalog reads.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::handlers::ApiError;
use crate::state::AppState;

// ── Rows ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct McpIntegration {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub kind: String,
    pub description: String,
    pub paid: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct McpConnectionRow {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub name: String,
    pub url: String,
    /// Encrypted at rest; never serialized.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub enabled: bool,
    pub timeout_secs: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct McpToolRow {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub tool_name: String,
    pub description: Option<String>,
    pub input_schema: String,
    pub discovered_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IntegrationPurchase {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub purchased_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateConnection {
    pub integration_id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchase {
    pub integration_id: Uuid,
}

// ── DB functions ────────────────────────────────────────────────────────────

pub async fn list_connections(db: &PgPool) -> Result<Vec<McpConnectionRow>, sqlx::Error> {
    sqlx::query_as::<_, McpConnectionRow>(
        "SELECT * FROM ip_mcp_connections ORDER BY created_at ASC",
    )
    .fetch_all(db)
    .await
}

pub async fn get_connection(db: &PgPool, id: &Uuid) -> Result<Option<McpConnectionRow>, sqlx::Error> {
    sqlx::query_as::<_, McpConnectionRow>("SELECT * FROM ip_mcp_connections WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Replace-all persistence of a connection's discovered tools.
/// Each tuple is (tool_name, description, input_schema_json). Idempotent —
/// re-running with the same set leaves the table unchanged apart from
/// discovery timestamps. Delete + inserts run in one transaction, so a
/// failed insert never empties the stored fallback for the connection.
pub async fn save_discovered_tools(
    db: &PgPool,
    connection_id: &Uuid,
    tools: &[(String, Option<String>, String)],
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM ip_mcp_tools WHERE connection_id = $1")
        .bind(connection_id)
        .execute(&mut *tx)
        .await?;
    for (name, desc, schema) in tools {
        sqlx::query(
            "INSERT INTO ip_mcp_tools (connection_id, tool_name, description, input_schema) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(connection_id)
        .bind(name)
        .bind(desc.as_deref())
        .bind(schema)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

pub async fn list_stored_tools(db: &PgPool) -> Result<Vec<McpToolRow>, sqlx::Error> {
    sqlx::query_as::<_, McpToolRow>(
        "SELECT * FROM ip_mcp_tools ORDER BY connection_id, tool_name ASC",
    )
    .fetch_all(db)
    .await
}

// ── Best-effort sync ────────────────────────────────────────────────────────

/// Refresh tool metadata for every enabled connection. Best-effort: each
/// failure is logged and swallowed — no retry, no backoff. Callers proceed
/// to their DB read regardless of the outcome.
pub async fn sync_mcp_tools(state: &AppState) {
    let connections = match list_connections(&state.db).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("mcp sync: failed to load connections: {}", e);
            return;
        }
    };

    for conn in connections.iter().filter(|c| c.enabled) {
        if let Err(e) = state.mcp.connect(conn).await {
            tracing::warn!("mcp sync: '{}' unreachable: {}", conn.name, e);
        } else {
            tracing::debug!(
                "mcp sync: '{}' refreshed ({} tools)",
                conn.name,
                state.mcp.connection_tools(&conn.id).await.len()
            );
        }
    }
}

// ── HTTP handlers ───────────────────────────────────────────────────────────

/// GET /api/mcp/integrations — catalog with connection/tool counts.
/// Tool metadata is refreshed best-effort before the read.
pub async fn list_integrations(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    sync_mcp_tools(&state).await;

    let integrations = sqlx::query_as::<_, McpIntegration>(
        "SELECT * FROM ip_mcp_integrations ORDER BY name ASC",
    )
    .fetch_all(&state.db)
    .await?;

    let connections = list_connections(&state.db).await?;

    let mut out = Vec::with_capacity(integrations.len());
    for integration in &integrations {
        let conns: Vec<&McpConnectionRow> = connections
            .iter()
            .filter(|c| c.integration_id == integration.id)
            .collect();
        let mut tool_count = 0usize;
        for c in &conns {
            tool_count += state.mcp.connection_tools(&c.id).await.len();
        }
        out.push(json!({
            "id": integration.id,
            "slug": integration.slug,
            "name": integration.name,
            "kind": integration.kind,
            "description": integration.description,
            "paid": integration.paid,
            "connections": conns.len(),
            "tools": tool_count,
        }));
    }

    Ok(Json(json!({ "integrations": out })))
}

/// GET /api/mcp/connections
pub async fn connection_list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let connections = list_connections(&state.db).await?;
    Ok(Json(json!({ "connections": connections })))
}

/// POST /api/mcp/connections — create a connection; paid integrations
/// require a purchase record first.
pub async fn connection_create(
    State(state): State<AppState>,
    Json(body): Json<CreateConnection>,
) -> Result<(axum::http::StatusCode, Json<Value>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Connection name is required".into()));
    }
    if url::Url::parse(&body.url).is_err() {
        return Err(ApiError::BadRequest("Connection URL is not a valid URL".into()));
    }

    let integration = sqlx::query_as::<_, McpIntegration>(
        "SELECT * FROM ip_mcp_integrations WHERE id = $1",
    )
    .bind(body.integration_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("Integration not found".into()))?;

    if integration.paid {
        let purchased = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ip_integration_purchases WHERE integration_id = $1",
        )
        .bind(integration.id)
        .fetch_one(&state.db)
        .await?;
        if purchased == 0 {
            return Err(ApiError::Forbidden(format!(
                "Integration '{}' requires a purchase",
                integration.slug
            )));
        }
    }

    let auth_token = body.auth_token.as_deref().map(crate::oauth::encrypt_token);

    let row = sqlx::query_as::<_, McpConnectionRow>(
        "INSERT INTO ip_mcp_connections (integration_id, name, url, auth_token, enabled, timeout_secs) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(body.integration_id)
    .bind(body.name.trim())
    .bind(&body.url)
    .bind(&auth_token)
    .bind(body.enabled.unwrap_or(true))
    .bind(body.timeout_secs.unwrap_or(30))
    .fetch_one(&state.db)
    .await?;

    tracing::info!("mcp: connection '{}' created for '{}'", row.name, integration.slug);
    Ok((axum::http::StatusCode::CREATED, Json(serde_json::to_value(&row).unwrap_or_default())))
}

/// DELETE /api/mcp/connections/{id}
pub async fn connection_delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.mcp.disconnect(&id).await;
    let result = sqlx::query("DELETE FROM ip_mcp_connections WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("MCP connection not found".into()));
    }
    Ok(Json(json!({ "deleted": true })))
}

/// POST /api/mcp/connections/{id}/sync — explicit, error-surfacing sync of
/// one connection (unlike the best-effort bulk refresh).
pub async fn connection_sync(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let conn = get_connection(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("MCP connection not found".into()))?;

    state
        .mcp
        .connect(&conn)
        .await
        .map_err(ApiError::Upstream)?;

    let tools = state.mcp.connection_tools(&id).await;
    Ok(Json(json!({
        "connected": true,
        "tools_discovered": tools.len(),
        "tools": tools
            .iter()
            .map(|t| json!({
                "name": t.name,
                "prefixed_name": t.prefixed_name,
                "description": t.description
            }))
            .collect::<Vec<_>>()
    })))
}

/// GET /api/mcp/tools — live tool set, falling back to the stored copy for
/// connections that are currently unreachable.
pub async fn tool_list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let live = state.mcp.list_all_tools().await;
    if !live.is_empty() {
        let tools: Vec<Value> = live
            .iter()
            .map(|t| json!({
                "name": t.name,
                "prefixed_name": t.prefixed_name,
                "connection_id": t.connection_id,
                "connection_name": t.connection_name,
                "description": t.description,
                "input_schema": t.input_schema,
                "source": "live"
            }))
            .collect();
        return Ok(Json(json!({ "tools": tools, "total": tools.len(), "source": "live" })));
    }

    let stored = list_stored_tools(&state.db).await?;
    let tools: Vec<Value> = stored
        .iter()
        .map(|t| json!({
            "name": t.tool_name,
            "connection_id": t.connection_id,
            "description": t.description,
            "input_schema": t.input_schema,
            "source": "db"
        }))
        .collect();
    Ok(Json(json!({ "tools": tools, "total": tools.len(), "source": "db" })))
}

/// GET /api/mcp/purchases
pub async fn purchase_list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let purchases = sqlx::query_as::<_, IntegrationPurchase>(
        "SELECT * FROM ip_integration_purchases ORDER BY purchased_at ASC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(json!({ "purchases": purchases })))
}

/// POST /api/mcp/purchases — record a purchase (idempotent per integration).
pub async fn purchase_create(
    State(state): State<AppState>,
    Json(body): Json<CreatePurchase>,
) -> Result<(axum::http::StatusCode, Json<Value>), ApiError> {
    let exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM ip_mcp_integrations WHERE id = $1",
    )
    .bind(body.integration_id)
    .fetch_one(&state.db)
    .await?;
    if exists == 0 {
        return Err(ApiError::NotFound("Integration not found".into()));
    }

    sqlx::query(
        "INSERT INTO ip_integration_purchases (integration_id) VALUES ($1) \
         ON CONFLICT (integration_id) DO NOTHING",
    )
    .bind(body.integration_id)
    .execute(&state.db)
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(json!({ "purchased": true }))))
}
