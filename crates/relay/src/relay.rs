//! Broadcast relay.
//!
//! `BroadcastRelay` owns the session registry and the shared document
//! behind one async mutex. Every edit is a single critical section:
//! replace the content, record the sender's cursor, then queue the update
//! on each peer's bounded outbox. A peer whose outbox is full or closed is
//! removed on the spot instead of stalling the sender.

use crate::document::DocumentState;
use crate::error::{RelayError, RelayResult};
use crate::message::{EditMessage, ServerMessage};
use crate::session::{PeerSender, SessionId, SessionRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

struct RelayState {
    registry: SessionRegistry,
    document: DocumentState,
}

/// Outcome of fanning one edit out to peers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Peers the update was queued for.
    pub delivered: usize,
    /// Peers that could not be reached and were disconnected.
    pub dropped: Vec<SessionId>,
}

/// Health summary for the outer HTTP layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub connected_clients: usize,
    /// Address the server is listening on, once bound.
    pub server_addr: Option<SocketAddr>,
}

/// Shared handle to the relay. Cheap to clone; all clones see the same
/// sessions and document.
#[derive(Clone)]
pub struct BroadcastRelay {
    state: Arc<Mutex<RelayState>>,
    server_addr: Arc<OnceLock<SocketAddr>>,
}

impl BroadcastRelay {
    /// Create a relay serving the given document.
    pub fn new(document: DocumentState) -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState {
                registry: SessionRegistry::new(),
                document,
            })),
            server_addr: Arc::new(OnceLock::new()),
        }
    }

    /// Register a connection and return its session id.
    pub async fn admit(&self, outbox: PeerSender) -> SessionId {
        let mut state = self.state.lock().await;
        let id = state.registry.admit(outbox);
        tracing::info!(session_id = %id, connected = state.registry.count(), "Client connected");
        id
    }

    /// Deregister a session. Returns `false` if it was already gone.
    pub async fn remove(&self, id: SessionId) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.registry.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, connected = state.registry.count(), "Client disconnected");
        }
        removed
    }

    /// Overwrite a session's cursor bookmark. No-op for unknown sessions.
    pub async fn update_cursor(&self, id: SessionId, cursor: Option<Value>) {
        self.state.lock().await.registry.update_cursor(id, cursor);
    }

    /// Last cursor bookmark received from a session.
    pub async fn cursor(&self, id: SessionId) -> Option<Value> {
        let state = self.state.lock().await;
        state.registry.get(id).and_then(|s| s.cursor().cloned())
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.state.lock().await.registry.count()
    }

    /// Sessions other than `excluding`, as of now.
    pub async fn snapshot_peers(&self, excluding: SessionId) -> Vec<SessionId> {
        self.state.lock().await.registry.snapshot_peers(excluding)
    }

    /// Current edited content.
    pub async fn content(&self) -> String {
        self.state.lock().await.document.content().to_string()
    }

    /// Number of edits applied since startup.
    pub async fn revision(&self) -> u64 {
        self.state.lock().await.document.revision()
    }

    /// Full specification object, including the latest content.
    pub async fn document_snapshot(&self) -> Map<String, Value> {
        self.state.lock().await.document.snapshot()
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            connected_clients: self.count().await,
            server_addr: self.server_addr.get().copied(),
        }
    }

    /// Record the address the server bound to. Only the first call sticks.
    pub fn set_server_addr(&self, addr: SocketAddr) {
        if self.server_addr.set(addr).is_err() {
            tracing::debug!(%addr, "Server address already recorded");
        }
    }

    /// Parse a raw text frame and relay it.
    ///
    /// A malformed frame is logged and rejected without touching the
    /// document; the caller keeps the connection open.
    pub async fn handle_frame(&self, sender: SessionId, text: &str) -> RelayResult<DeliveryReport> {
        let edit = match EditMessage::parse(text) {
            Ok(edit) => edit,
            Err(e) => {
                tracing::warn!(session_id = %sender, error = %e, "Dropping malformed frame");
                return Err(e);
            }
        };
        self.handle_edit(sender, edit).await
    }

    /// Apply an edit from `sender` and fan it out to every other session.
    pub async fn handle_edit(&self, sender: SessionId, edit: EditMessage) -> RelayResult<DeliveryReport> {
        let mut state = self.state.lock().await;
        let RelayState { registry, document } = &mut *state;

        // An edit still in flight from a removed session is discarded.
        if !registry.contains(sender) {
            tracing::debug!(session_id = %sender, "Discarding edit from closed session");
            return Err(RelayError::ConnectionClosed(sender));
        }

        document.replace_content(edit.content.clone());
        registry.update_cursor(sender, edit.cursor.clone());
        registry.update_client_id(sender, edit.client_id.clone());

        let message = Arc::new(ServerMessage::content_update(&edit));
        let mut report = DeliveryReport::default();

        for peer in registry.snapshot_peers(sender) {
            let Some(session) = registry.get_mut(peer) else {
                continue;
            };
            match session.deliver(Arc::clone(&message)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(session_id = %sender, peer = %peer, error = %e, "Disconnecting unreachable peer");
                    registry.remove(peer);
                    report.dropped.push(peer);
                }
            }
        }

        tracing::debug!(
            session_id = %sender,
            client_id = ?edit.client_id,
            revision = document.revision(),
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "Relayed content update"
        );

        Ok(report)
    }
}

impl Default for BroadcastRelay {
    fn default() -> Self {
        Self::new(DocumentState::default())
    }
}
