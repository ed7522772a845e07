//! Session registry for connected editors.
//!
//! The registry owns one `Session` per open connection, keyed by a
//! generated `SessionId` rather than by the transport handle. It holds no
//! locks of its own; `BroadcastRelay` serializes access to it.

use crate::error::{RelayError, RelayResult};
use crate::message::ServerMessage;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outbound queue handle for one session.
///
/// The channel is bounded; a full queue means the peer is too slow and
/// will be disconnected rather than waited on.
pub type PeerSender = mpsc::Sender<Arc<ServerMessage>>;

/// Receiving half of a session's outbound queue.
pub type PeerReceiver = mpsc::Receiver<Arc<ServerMessage>>;

/// Registry-assigned identifier for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session({})", self.0)
    }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is up but the session has not been admitted.
    #[default]
    Connecting,
    /// Registered and receiving broadcasts.
    Active,
    /// Removed from the registry. Terminal.
    Closed,
}

impl SessionState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Connecting, SessionState::Active)
                | (SessionState::Connecting, SessionState::Closed)
                | (SessionState::Active, SessionState::Closed)
        )
    }
}

/// One connected editor.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    /// Last client-supplied identifier, unvalidated.
    client_id: Option<String>,
    /// Last cursor bookmark received from this client.
    cursor: Option<Value>,
    outbox: PeerSender,
    messages_sent: u64,
}

impl Session {
    fn new(id: SessionId, outbox: PeerSender) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            client_id: None,
            cursor: None,
            outbox,
            messages_sent: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn cursor(&self) -> Option<&Value> {
        self.cursor.as_ref()
    }

    /// Number of broadcasts queued for this session so far.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            tracing::warn!(
                session_id = %self.id,
                from = ?self.state,
                to = ?next,
                "Ignoring illegal session transition"
            );
        }
    }

    /// Queue a broadcast without waiting.
    ///
    /// Fails when the outbox is full or its receiver has been dropped.
    pub fn deliver(&mut self, msg: Arc<ServerMessage>) -> RelayResult<()> {
        match self.outbox.try_send(msg) {
            Ok(()) => {
                self.messages_sent += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(RelayError::PeerUnreachable {
                peer: self.id,
                reason: "outbox full".to_string(),
            }),
            Err(TrySendError::Closed(_)) => Err(RelayError::PeerUnreachable {
                peer: self.id,
                reason: "connection gone".to_string(),
            }),
        }
    }
}

/// All currently connected sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session with its cursor unset.
    pub fn admit(&mut self, outbox: PeerSender) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);

        let mut session = Session::new(id, outbox);
        session.transition(SessionState::Active);
        self.sessions.insert(id, session);

        tracing::debug!(session_id = %id, sessions = self.sessions.len(), "Session admitted");
        id
    }

    /// Overwrite a session's cursor. No-op for unknown sessions.
    pub fn update_cursor(&mut self, id: SessionId, cursor: Option<Value>) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.cursor = cursor;
        }
    }

    /// Record the client-supplied identifier. No-op for unknown sessions.
    pub fn update_client_id(&mut self, id: SessionId, client_id: Option<String>) {
        if let Some(session) = self.sessions.get_mut(&id) {
            if client_id.is_some() {
                session.client_id = client_id;
            }
        }
    }

    /// Deregister a session. Removing an unknown session does nothing.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let mut session = self.sessions.remove(&id)?;
        session.transition(SessionState::Closed);

        tracing::debug!(session_id = %id, sessions = self.sessions.len(), "Session removed");
        Some(session)
    }

    /// Point-in-time list of every session except `excluding`.
    pub fn snapshot_peers(&self, excluding: SessionId) -> Vec<SessionId> {
        self.sessions
            .keys()
            .copied()
            .filter(|id| *id != excluding)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
