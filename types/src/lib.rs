//! Shared wire types for the Terraform MCP server.
//!
//! This crate contains the JSON-RPC message model and the protocol
//! constants shared between the stdio and streamable-HTTP transports.

/// Default port for the streamable-HTTP transport.
pub const DEFAULT_PORT: u16 = 8080;

/// Default bind host for the streamable-HTTP transport.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default MCP endpoint path.
pub const DEFAULT_ENDPOINT: &str = "/mcp";

/// Header carrying the MCP session id in both directions.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Service name reported by the health check and `initialize`.
pub const SERVICE_NAME: &str = "terraform-mcp-server";

pub mod health;
pub mod jsonrpc;

pub use health::HealthResponse;
pub use jsonrpc::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
