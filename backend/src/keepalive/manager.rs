//! Keep-alive session table.
//!
//! The table mapping session ids to cancellation handles is owned by a single
//! actor task. Request handlers, writer tasks and the shutdown path only talk
//! to it through [`KeepAliveManager`], so the table is never shared.

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

enum Command {
    Register {
        session_id: String,
        reply: oneshot::Sender<Option<(u64, CancellationToken)>>,
    },
    Release {
        session_id: String,
        generation: u64,
    },
    Stop {
        session_id: String,
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
    Active {
        reply: oneshot::Sender<Vec<String>>,
    },
}

struct Entry {
    generation: u64,
    token: CancellationToken,
}

/// State owned by the actor task.
struct SessionTable {
    sessions: HashMap<String, Entry>,
    root: CancellationToken,
    next_generation: u64,
    closed: bool,
}

impl SessionTable {
    fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            root: CancellationToken::new(),
            next_generation: 0,
            closed: false,
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register { session_id, reply } => {
                let registration = self.register(session_id);
                let _ = reply.send(registration);
            }
            Command::Release {
                session_id,
                generation,
            } => {
                let current = self
                    .sessions
                    .get(&session_id)
                    .is_some_and(|entry| entry.generation == generation);
                if current {
                    if let Some(entry) = self.sessions.remove(&session_id) {
                        entry.token.cancel();
                    }
                    debug!(session_id = %session_id, "Keep-alive stopped");
                }
            }
            Command::Stop { session_id, reply } => {
                let stopped = match self.sessions.remove(&session_id) {
                    Some(entry) => {
                        entry.token.cancel();
                        debug!(session_id = %session_id, "Keep-alive cancelled");
                        true
                    }
                    None => false,
                };
                let _ = reply.send(stopped);
            }
            Command::Shutdown { reply } => {
                self.closed = true;
                self.root.cancel();
                let cancelled = self.sessions.len();
                self.sessions.clear();
                info!(sessions = cancelled, "Cancelled all keep-alive tasks");
                let _ = reply.send(cancelled);
            }
            Command::Active { reply } => {
                let _ = reply.send(self.sessions.keys().cloned().collect());
            }
        }
    }

    fn register(&mut self, session_id: String) -> Option<(u64, CancellationToken)> {
        if self.closed || self.sessions.contains_key(&session_id) {
            return None;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let token = self.root.child_token();
        self.sessions.insert(
            session_id.clone(),
            Entry {
                generation,
                token: token.clone(),
            },
        );
        debug!(session_id = %session_id, "Keep-alive started");
        Some((generation, token))
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut table = SessionTable::new();
    while let Some(command) = commands.recv().await {
        table.apply(command);
    }
    table.root.cancel();
}

/// Handle to the keep-alive session table.
///
/// Cloning is cheap; all clones talk to the same actor. Must be created
/// inside a Tokio runtime.
#[derive(Clone, Debug)]
pub struct KeepAliveManager {
    commands: mpsc::UnboundedSender<Command>,
}

impl KeepAliveManager {
    /// Spawn the session table actor.
    pub fn new() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { commands }
    }

    /// Claim the keep-alive slot for a session.
    ///
    /// Returns `None` when a task is already running for this id or the
    /// manager has been shut down. The slot is released when the returned
    /// [`Registration`] is dropped.
    pub async fn register(&self, session_id: &str) -> Option<Registration> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Register {
                session_id: session_id.to_string(),
                reply,
            })
            .ok()?;
        let (generation, token) = rx.await.ok()??;

        Some(Registration {
            session_id: session_id.to_string(),
            generation,
            token,
            commands: self.commands.clone(),
        })
    }

    /// Cancel the keep-alive task of one session.
    pub async fn stop(&self, session_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Stop {
            session_id: session_id.to_string(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Cancel every keep-alive task and refuse new registrations.
    ///
    /// Returns the number of sessions that were active.
    pub async fn shutdown(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Ids of the sessions with a running keep-alive task.
    pub async fn active_sessions(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Active { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

impl Default for KeepAliveManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A claimed keep-alive slot. Dropping it deregisters the session.
#[derive(Debug)]
pub struct Registration {
    session_id: String,
    generation: u64,
    token: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
}

impl Registration {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the session is stopped or the manager shuts down.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Release {
            session_id: std::mem::take(&mut self.session_id),
            generation: self.generation,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_one_registration_per_session() {
        let manager = KeepAliveManager::new();

        let first = manager.register("abc").await;
        assert!(first.is_some());
        assert!(manager.register("abc").await.is_none());
        assert!(manager.register("def").await.is_some());
    }

    #[tokio::test]
    async fn test_drop_releases_slot() {
        let manager = KeepAliveManager::new();

        let registration = manager.register("abc").await.unwrap();
        assert_eq!(manager.active_sessions().await, vec!["abc".to_string()]);

        drop(registration);
        assert!(manager.active_sessions().await.is_empty());
        assert!(manager.register("abc").await.is_some());
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_registration() {
        let manager = KeepAliveManager::new();

        let old = manager.register("abc").await.unwrap();
        assert!(manager.stop("abc").await);
        assert!(old.is_cancelled());

        let new = manager.register("abc").await.unwrap();
        drop(old);

        assert_eq!(manager.active_sessions().await, vec!["abc".to_string()]);
        assert!(!new.is_cancelled());
    }

    #[tokio::test]
    async fn test_stop_unknown_session() {
        let manager = KeepAliveManager::new();
        assert!(!manager.stop("missing").await);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all_and_refuses_new() {
        let manager = KeepAliveManager::new();
        let a = manager.register("a").await.unwrap();
        let b = manager.register("b").await.unwrap();

        assert_eq!(manager.shutdown().await, 2);

        tokio::time::timeout(Duration::from_secs(1), async {
            a.cancelled().await;
            b.cancelled().await;
        })
        .await
        .expect("registrations should be cancelled");

        assert!(manager.register("c").await.is_none());
        assert!(manager.active_sessions().await.is_empty());
    }
}
