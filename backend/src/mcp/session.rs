//! MCP session store.
//!
//! Tracks sessions for the stateful mode of the streamable-HTTP endpoint.
//! Session ids are assigned by the session layer in front of the endpoint;
//! this store only records which ids are live and carries the broadcast
//! channel used for server-initiated messages.
//!
//! Sessions are removed by DELETE or, once idle with no open stream, by the
//! sweep started with [`McpSessionManager::spawn_cleanup`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use terraform_mcp_types::JsonRpcRequest;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Capacity of each session's server-to-client channel.
const EVENT_BUFFER: usize = 100;

/// Events that can be sent to MCP clients via SSE.
#[derive(Clone, Debug)]
pub enum McpEvent {
    /// A serialized JSON-RPC message to send to the client.
    JsonRpc(String),
}

impl McpEvent {
    /// Build an event carrying a JSON-RPC notification.
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        let message = JsonRpcRequest::notification(method, params);
        McpEvent::JsonRpc(serde_json::to_string(&message).unwrap_or_default())
    }
}

/// An MCP session.
#[derive(Debug)]
pub struct McpSession {
    /// Session identifier.
    pub id: String,
    /// When the session was created.
    pub created_at: Instant,
    /// Last request seen for this session.
    pub last_active: Instant,
    /// Broadcast sender for SSE events.
    event_tx: broadcast::Sender<McpEvent>,
}

impl McpSession {
    fn new(id: String) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_active: now,
            event_tx,
        }
    }

    /// Time since the last request for this session.
    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Number of open SSE streams.
    pub fn stream_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

/// Manager for MCP sessions.
#[derive(Clone, Default)]
pub struct McpSessionManager {
    sessions: Arc<RwLock<HashMap<String, McpSession>>>,
}

impl McpSessionManager {
    /// Create a new session manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session under the given id. Returns false if it already existed.
    pub async fn create_session(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(id) {
            session.last_active = Instant::now();
            return false;
        }
        sessions.insert(id.to_string(), McpSession::new(id.to_string()));
        info!(session_id = %id, "Created MCP session");
        true
    }

    /// Check if a session exists.
    pub async fn session_exists(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Record activity on a session. Returns false if it does not exist.
    pub async fn touch(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) => {
                session.last_active = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Subscribe to a session's event stream.
    pub async fn subscribe(&self, id: &str) -> Option<broadcast::Receiver<McpEvent>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|s| s.event_tx.subscribe())
    }

    /// Send an event to a session's subscribers. Returns the number of receivers reached.
    pub async fn send_event(&self, id: &str, event: McpEvent) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .and_then(|session| session.event_tx.send(event).ok())
            .unwrap_or(0)
    }

    /// Terminate a session, closing its event streams.
    pub async fn terminate(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_some() {
            info!(session_id = %id, "Terminated MCP session");
            true
        } else {
            false
        }
    }

    /// Get the number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove sessions idle for at least `max_idle` with no open stream.
    ///
    /// Returns the number of sessions removed.
    pub async fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();

        sessions.retain(|id, session| {
            let keep = session.stream_count() > 0 || session.idle_for() < max_idle;
            if !keep {
                info!(
                    session_id = %id,
                    age_secs = session.created_at.elapsed().as_secs(),
                    "Removing stale MCP session"
                );
            }
            keep
        });

        before - sessions.len()
    }

    /// Sweep stale sessions every `max_idle` until the store is dropped.
    ///
    /// `max_idle` must be non-zero.
    pub fn spawn_cleanup(&self, max_idle: Duration) -> JoinHandle<()> {
        let sessions = Arc::downgrade(&self.sessions);
        tokio::spawn(cleanup_loop(sessions, max_idle))
    }
}

async fn cleanup_loop(sessions: Weak<RwLock<HashMap<String, McpSession>>>, max_idle: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + max_idle, max_idle);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(sessions) = sessions.upgrade() else {
            debug!("MCP session store dropped, stopping cleanup");
            return;
        };
        let removed = McpSessionManager { sessions }.cleanup_stale(max_idle).await;
        if removed > 0 {
            debug!(removed, "MCP session cleanup");
        }
    }
}
