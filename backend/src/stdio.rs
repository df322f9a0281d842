//! Stdio transport: newline-delimited JSON-RPC over a reader/writer pair.

use std::sync::Arc;
use terraform_mcp_types::{error_codes, JsonRpcRequest, JsonRpcResponse};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::mcp::McpDispatcher;

/// Serve requests read from `reader` until EOF.
///
/// Each non-empty line is one JSON-RPC message. Responses are written one
/// per line and flushed immediately; notifications produce no output.
pub async fn serve<R, W>(
    dispatcher: Arc<dyn McpDispatcher>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Serving MCP over stdio");
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => dispatcher.handle_request(None, request).await,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed JSON-RPC line");
                Some(JsonRpcResponse::error(
                    None,
                    error_codes::PARSE_ERROR,
                    "Parse error",
                ))
            }
        };

        if let Some(response) = response {
            let mut encoded = serde_json::to_vec(&response)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await?;
            writer.flush().await?;
        }
    }

    debug!("Stdin closed");
    Ok(())
}
