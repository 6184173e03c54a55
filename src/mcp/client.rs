//! MCP client manager — JSON-RPC 2.0 over HTTP.
//!
//! Connects to configured MCP servers, discovers their tools, and proxies
//! `tools/call` requests so the assistant can use them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::registry::{self, McpConnectionRow};

// ── Tool descriptor ─────────────────────────────────────────────────────────

/// A tool discovered from an MCP server, enriched with routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    /// Original tool name from the MCP server.
    pub name: String,
    /// Prefixed name used in assistant tool dispatch: `mcp_{connection}_{tool}`.
    pub prefixed_name: String,
    /// Human-readable connection name (for UI display).
    pub connection_name: String,
    /// Connection ID (DB primary key).
    pub connection_id: Uuid,
    pub description: Option<String>,
    /// JSON Schema for tool input parameters.
    pub input_schema: Value,
}

// ── Connection state ────────────────────────────────────────────────────────

/// An active connection to an MCP server.
#[derive(Debug)]
struct ActiveConnection {
    url: String,
    auth_token: Option<String>,
    timeout: Duration,
    tools: Vec<McpTool>,
    /// MCP session ID returned by `initialize`, echoed as `Mcp-Session-Id`.
    #[allow(dead_code)]
    session_id: Option<String>,
}

// ── Client manager ──────────────────────────────────────────────────────────

/// Manages live connections to MCP servers, keyed by connection ID.
/// Tools from all connections are merged in `list_all_tools()`.
pub struct McpClientManager {
    connections: RwLock<HashMap<Uuid, Arc<ActiveConnection>>>,
    db: PgPool,
    client: Client,
}

impl McpClientManager {
    pub fn new(db: PgPool, client: Client) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            db,
            client,
        }
    }

    /// Connect to a single MCP server: initialize + discover tools, then
    /// persist the discovered set (replace-all) and cache the connection.
    pub async fn connect(&self, row: &McpConnectionRow) -> Result<(), String> {
        let timeout = Duration::from_secs(row.timeout_secs.max(5) as u64);

        let auth_token = match row.auth_token.as_deref() {
            Some(stored) => Some(crate::oauth::decrypt_token(stored)?),
            None => None,
        };

        // Step 1: initialize
        let init_response = self
            .json_rpc_call(&row.url, auth_token.as_deref(), timeout, json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {
                        "tools": { "listChanged": true }
                    },
                    "clientInfo": {
                        "name": "MailPilot",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }
            }))
            .await?;

        let session_id = init_response
            .get("_mcp_session_id")
            .and_then(|v| v.as_str())
            .map(String::from);

        tracing::debug!(
            "mcp: initialized '{}' (protocol version: {})",
            row.name,
            init_response
                .pointer("/result/protocolVersion")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
        );

        // Step 2: list tools
        let tools_response = self
            .json_rpc_call(&row.url, auth_token.as_deref(), timeout, json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/list"
            }))
            .await?;

        let raw_tools = tools_response
            .pointer("/result/tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let sanitized = sanitize_connection_name(&row.name);

        let tools: Vec<McpTool> = raw_tools
            .iter()
            .filter_map(|t| {
                let name = t.get("name")?.as_str()?.to_string();
                let description = t.get("description").and_then(|d| d.as_str()).map(String::from);
                let input_schema = t
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or(json!({"type": "object", "properties": {}}));
                let prefixed = format!("mcp_{}_{}", sanitized, name);

                Some(McpTool {
                    name,
                    prefixed_name: prefixed,
                    connection_name: row.name.clone(),
                    connection_id: row.id,
                    description,
                    input_schema,
                })
            })
            .collect();

        // Step 3: persist discovered tools (replace-all, idempotent)
        let db_tools: Vec<(String, Option<String>, String)> = tools
            .iter()
            .map(|t| (t.name.clone(), t.description.clone(), t.input_schema.to_string()))
            .collect();
        if let Err(e) = registry::save_discovered_tools(&self.db, &row.id, &db_tools).await {
            tracing::warn!("mcp: failed to persist tools for '{}': {}", row.name, e);
        }

        // Step 4: cache the live connection
        let conn = Arc::new(ActiveConnection {
            url: row.url.clone(),
            auth_token,
            timeout,
            tools,
            session_id,
        });

        self.connections.write().await.insert(row.id, conn);
        Ok(())
    }

    /// Remove a connection from the live set.
    pub async fn disconnect(&self, connection_id: &Uuid) {
        self.connections.write().await.remove(connection_id);
        tracing::info!("mcp: disconnected {}", connection_id);
    }

    // ── Tool access ─────────────────────────────────────────────────────

    /// All tools from a specific live connection.
    pub async fn connection_tools(&self, connection_id: &Uuid) -> Vec<McpTool> {
        let lock = self.connections.read().await;
        lock.get(connection_id)
            .map(|c| c.tools.clone())
            .unwrap_or_default()
    }

    /// All tools from all live connections.
    pub async fn list_all_tools(&self) -> Vec<McpTool> {
        let lock = self.connections.read().await;
        lock.values()
            .flat_map(|c| c.tools.iter().cloned())
            .collect()
    }

    /// Find the connection and original tool name for a prefixed tool name.
    async fn resolve_tool(&self, prefixed_name: &str) -> Option<(Arc<ActiveConnection>, String)> {
        let lock = self.connections.read().await;
        for conn in lock.values() {
            for tool in &conn.tools {
                if tool.prefixed_name == prefixed_name {
                    return Some((conn.clone(), tool.name.clone()));
                }
            }
        }
        None
    }

    // ── Call tool ───────────────────────────────────────────────────────

    /// Call a tool on a live MCP connection by its prefixed name.
    pub async fn call_tool(&self, prefixed_name: &str, arguments: &Value) -> Result<String, String> {
        let (conn, original_name) = self
            .resolve_tool(prefixed_name)
            .await
            .ok_or_else(|| format!("MCP tool '{}' not found in any live connection", prefixed_name))?;

        let response = self
            .json_rpc_call(
                &conn.url,
                conn.auth_token.as_deref(),
                conn.timeout,
                json!({
                    "jsonrpc": "2.0",
                    "id": 3,
                    "method": "tools/call",
                    "params": {
                        "name": original_name,
                        "arguments": arguments
                    }
                }),
            )
            .await?;

        if let Some(error) = response.get("error") {
            let msg = error.get("message").and_then(|m| m.as_str()).unwrap_or("Unknown MCP error");
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            return Err(format!("MCP error {}: {}", code, msg));
        }

        // tools/call result is { content: [{ type: "text", text: "..." }] }
        if let Some(content) = response.pointer("/result/content") {
            if let Some(arr) = content.as_array() {
                let texts: Vec<&str> = arr
                    .iter()
                    .filter_map(|c| {
                        if c.get("type").and_then(|t| t.as_str()) == Some("text") {
                            c.get("text").and_then(|t| t.as_str())
                        } else {
                            None
                        }
                    })
                    .collect();
                if !texts.is_empty() {
                    return Ok(texts.join("\n"));
                }
            }
            return Ok(content.to_string());
        }

        Ok(response
            .get("result")
            .map(|r| r.to_string())
            .unwrap_or_else(|| "{}".to_string()))
    }

    // ── JSON-RPC transport ──────────────────────────────────────────────

    async fn json_rpc_call(
        &self,
        url: &str,
        auth_token: Option<&str>,
        timeout: Duration,
        body: Value,
    ) -> Result<Value, String> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&body);

        if let Some(token) = auth_token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req
            .send()
            .await
            .map_err(|e| format!("MCP HTTP request to '{}' failed: {}", url, e))?;

        let session_id = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(format!(
                "MCP server returned HTTP {}: {}",
                status,
                truncate_str(&body_text, 500)
            ));
        }

        let mut json: Value = response
            .json()
            .await
            .map_err(|e| format!("MCP response is not valid JSON: {}", e))?;

        if let Some(sid) = session_id {
            json["_mcp_session_id"] = Value::String(sid);
        }

        Ok(json)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn sanitize_connection_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            result.push(ch.to_ascii_lowercase());
        } else if !result.ends_with('_') {
            result.push('_');
        }
    }
    result.trim_end_matches('_').to_string()
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let boundary = s
            .char_indices()
            .take_while(|(i, _)| *i < max_len)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(max_len);
        format!("{}...", &s[..boundary])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_connection_names() {
        assert_eq!(sanitize_connection_name("odoo-prod"), "odoo_prod");
        assert_eq!(sanitize_connection_name("My Shop 2"), "my_shop_2");
        assert_eq!(sanitize_connection_name("a--b"), "a_b");
        assert_eq!(sanitize_connection_name("UPPER"), "upper");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello...");
    }
}
