//! MCP (Model Context Protocol) request handling.
//!
//! The transports hand each decoded JSON-RPC message to an [`McpDispatcher`].
//! [`ProtocolHandler`] answers the protocol lifecycle methods; tool
//! catalogues plug in behind the same trait.
//!
//! [`McpSessionManager`] backs the stateful mode of the streamable-HTTP
//! endpoint.

pub mod handler;
pub mod session;

pub use handler::{McpDispatcher, ProtocolHandler};
pub use session::{McpEvent, McpSession, McpSessionManager};
