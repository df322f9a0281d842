//! Terraform MCP server.

use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};

use terraform_mcp_server::{
    config::{Config, TransportKind},
    logging,
    mcp::{McpDispatcher, ProtocolHandler},
    server::shutdown_signal,
    stdio, StreamableHttpServer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet.
            eprintln!("Fatal configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let log_guard = logging::init(config.log_level.as_deref(), config.log_file.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Terraform MCP server"
    );

    let dispatcher: Arc<dyn McpDispatcher> = Arc::new(ProtocolHandler::new());

    let result = match config.transport {
        TransportKind::Stdio => {
            let stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                result = stdio::serve(dispatcher, stdin, tokio::io::stdout()) => result.map_err(anyhow::Error::from),
                _ = shutdown_signal() => Ok(()),
            }
        }
        TransportKind::StreamableHttp => StreamableHttpServer::new(&config.http, dispatcher)
            .run()
            .await
            .map_err(anyhow::Error::from),
    };

    if let Err(e) = result {
        error!("Server failed: {:#}", e);
        drop(log_guard);
        std::process::exit(1);
    }

    info!("Shutdown complete");
    Ok(())
}
