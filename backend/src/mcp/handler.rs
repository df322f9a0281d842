//! MCP JSON-RPC dispatch.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use terraform_mcp_types::{
    error_codes, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, SERVICE_NAME,
};
use tracing::debug;

/// Handles one decoded JSON-RPC message.
///
/// Returns `None` when no response is due (notifications).
#[async_trait]
pub trait McpDispatcher: Send + Sync {
    async fn handle_request(
        &self,
        session_id: Option<&str>,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse>;
}

/// Tool call parameters from MCP.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Answers the MCP protocol lifecycle methods.
///
/// Tool, resource and prompt catalogues are empty; `tools/call` reports an
/// unknown tool.
#[derive(Debug, Default, Clone)]
pub struct ProtocolHandler;

impl ProtocolHandler {
    pub fn new() -> Self {
        Self
    }

    /// Handle the initialize request.
    fn handle_initialize(id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": false },
                    "resources": { "listChanged": false },
                    "prompts": { "listChanged": false }
                },
                "serverInfo": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    /// Handle the tools/call request.
    fn handle_call_tool(id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params = match params.map(serde_json::from_value::<ToolCallParams>) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("Invalid tool call parameters: {}", e),
                )
            }
            None => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    "Missing tool call parameters",
                )
            }
        };

        JsonRpcResponse::error(
            id,
            error_codes::INVALID_PARAMS,
            format!("Unknown tool: {}", params.name),
        )
    }
}

#[async_trait]
impl McpDispatcher for ProtocolHandler {
    async fn handle_request(
        &self,
        session_id: Option<&str>,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, session_id = ?session_id, "MCP: Handling method");

        if request.jsonrpc != "2.0" {
            return (!request.is_notification()).then(|| {
                JsonRpcResponse::error(
                    request.id.clone(),
                    error_codes::INVALID_REQUEST,
                    "Unsupported jsonrpc version",
                )
            });
        }

        // Notifications never get a response, whatever the method.
        if request.is_notification() {
            return None;
        }

        let id = request.id;
        let response = match request.method.as_str() {
            "initialize" => Self::handle_initialize(id),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": [] })),
            "resources/list" => JsonRpcResponse::success(id, json!({ "resources": [] })),
            "resources/templates/list" => {
                JsonRpcResponse::success(id, json!({ "resourceTemplates": [] }))
            }
            "prompts/list" => JsonRpcResponse::success(id, json!({ "prompts": [] })),
            "tools/call" => Self::handle_call_tool(id, request.params),
            method => JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ),
        };

        Some(response)
    }
}
