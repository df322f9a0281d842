//! Terraform MCP server library.
//!
//! This module exposes the transports and the application builder for use
//! in the binary and in tests.

use axum::Router;
use std::sync::Arc;

pub mod api;
pub mod config;
pub mod cors;
pub mod error;
pub mod keepalive;
pub mod logging;
pub mod mcp;
pub mod server;
pub mod stdio;

use config::HttpConfig;
use mcp::ProtocolHandler;

pub use server::{BoundServer, StreamableHttpServer};

/// Create the Axum application router with the default protocol handler.
///
/// This function is used both by the main server binary and by integration tests.
pub fn create_app(config: &HttpConfig) -> Router {
    StreamableHttpServer::new(config, Arc::new(ProtocolHandler::new())).router()
}
