//! MCP Streamable HTTP endpoint handlers.
//!
//! Implements the MCP 2025-03-26 Streamable HTTP transport.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send a JSON-RPC request (returns JSON)
//! - `GET /mcp` - Open SSE stream for server-initiated messages
//! - `DELETE /mcp` - Terminate a session
//!
//! Origin checks and session id assignment happen in the layers in front of
//! these handlers; the session id arrives as an [`McpSessionId`] extension.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::stream::{self, BoxStream};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use terraform_mcp_types::{error_codes, JsonRpcRequest, JsonRpcResponse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::SessionMode;
use crate::keepalive::{frames::event_id, McpSessionId};
use crate::mcp::{McpDispatcher, McpEvent, McpSessionManager};

/// Shared state of the MCP endpoint.
#[derive(Clone)]
pub struct McpState {
    dispatcher: Arc<dyn McpDispatcher>,
    sessions: McpSessionManager,
    session_mode: SessionMode,
}

impl McpState {
    pub fn new(dispatcher: Arc<dyn McpDispatcher>, session_mode: SessionMode) -> Self {
        Self {
            dispatcher,
            sessions: McpSessionManager::new(),
            session_mode,
        }
    }

    /// The session store (empty in stateless mode).
    pub fn sessions(&self) -> &McpSessionManager {
        &self.sessions
    }

    fn is_stateful(&self) -> bool {
        self.session_mode == SessionMode::Stateful
    }
}

/// Routes for `endpoint` and its trailing-slash variant.
pub fn router(endpoint: &str, state: McpState) -> Router {
    let endpoint = endpoint.trim_end_matches('/');
    let handlers = || get(mcp_get).post(mcp_post).delete(mcp_delete);

    Router::new()
        .route(endpoint, handlers())
        .route(&format!("{}/", endpoint), handlers())
        .with_state(state)
}

fn session_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Session not found"})),
    )
        .into_response()
}

/// POST /mcp - Handle one JSON-RPC request.
///
/// Returns `200 application/json` with the response, or `202 Accepted` for a
/// notification. In stateful mode `initialize` and requests carrying a freshly
/// issued id record the session; any other request with an unknown
/// client-supplied session id gets `404`.
pub async fn mcp_post(
    State(state): State<McpState>,
    session: Option<McpSessionId>,
    body: Bytes,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "MCP: Rejecting malformed JSON-RPC body");
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(
                    None,
                    error_codes::PARSE_ERROR,
                    "Parse error",
                )),
            )
                .into_response();
        }
    };

    let session_id = session.as_ref().map(McpSessionId::id);
    debug!(method = %request.method, session_id = ?session_id, "MCP POST");

    let initialize = request.method == "initialize";
    if state.is_stateful() {
        if let Some(session) = &session {
            if initialize || session.is_generated() {
                state.sessions.create_session(session.id()).await;
            } else if !state.sessions.touch(session.id()).await {
                return session_not_found();
            }
        }
    }

    match state.dispatcher.handle_request(session_id, request).await {
        Some(response) => {
            if initialize && !response.is_error() {
                if let Some(id) = session_id.filter(|_| state.is_stateful()) {
                    info!(session_id = %id, "MCP: Session initialized");
                }
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// GET /mcp - Open SSE stream for server-initiated messages.
///
/// Stateful mode streams the messages published to the session; stateless
/// mode has nothing to push and the stream only carries keep-alive pings
/// written by the session layer.
pub async fn mcp_get(State(state): State<McpState>, session: Option<McpSessionId>) -> Response {
    let events: BoxStream<'static, Result<Event, Infallible>> = if state.is_stateful() {
        let Some(session) = session else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Mcp-Session-Id header required for SSE stream"})),
            )
                .into_response();
        };

        if session.is_generated() {
            state.sessions.create_session(session.id()).await;
        } else {
            state.sessions.touch(session.id()).await;
        }

        let Some(rx) = state.sessions.subscribe(session.id()).await else {
            return session_not_found();
        };

        info!(session_id = %session.id(), "MCP: SSE stream opened");
        Box::pin(session_events(rx))
    } else {
        Box::pin(stream::pending())
    };

    Sse::new(events).into_response()
}

/// Convert session events into SSE `message` events.
fn session_events(
    rx: tokio::sync::broadcast::Receiver<McpEvent>,
) -> impl futures::Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(McpEvent::JsonRpc(json)) => Some(Ok(Event::default()
            .event("message")
            .id(event_id())
            .data(json))),
        Err(e) => {
            warn!(error = %e, "MCP: SSE subscriber lagged, dropping events");
            None
        }
    })
}

/// DELETE /mcp - Terminate a session.
pub async fn mcp_delete(State(state): State<McpState>, session: Option<McpSessionId>) -> Response {
    if !state.is_stateful() {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Some(session) = session else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if state.sessions.terminate(session.id()).await {
        info!(session_id = %session.id(), "MCP: Session terminated");
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
