//! MCP (Model Context Protocol) integration layer.
//!
//! Connects the assistant to third-party tools (Odoo, PrestaShop, anything
//! speaking MCP) over JSON-RPC 2.0 on HTTP: `client` manages live
//! connections and tool discovery, `registry` holds the catalog /
//! connections / purchases CRUD plus the best-effort `sync_mcp_tools`
//! refresh that runs before catalog reads.
//!
//! Spec: <https://spec.modelcontextprotocol.io/2024-11-05/>

pub mod client;
pub mod registry;

pub use registry::sync_mcp_tools;
