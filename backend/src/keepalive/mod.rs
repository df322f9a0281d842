//! Session keep-alive for the streamable-HTTP transport.
//!
//! Long-lived MCP responses are silent while a tool runs or while a client
//! waits on its SSE stream, and intermediaries close idle connections. This
//! module keeps them open by writing a JSON-RPC `ping` each interval, at most
//! one keep-alive task per session id.

pub mod frames;
pub mod manager;
pub mod middleware;
pub mod session_id;

pub use frames::{PingStyle, PING_MESSAGE};
pub use manager::{KeepAliveManager, Registration};
pub use middleware::{session_middleware, SessionLayer};
pub use session_id::{generate_session_id, McpSessionId};
