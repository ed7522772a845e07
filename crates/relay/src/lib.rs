//! Real-time document broadcast relay.
//!
//! Connected clients edit one shared document. Every edit carries the full
//! new content plus the sender's cursor bookmark; the relay replaces the
//! document (last writer wins) and pushes the edit to every other session.
//! There is no merge, no history and no acknowledgement.
//!
//! # Modules
//!
//! - `session`: session registry and per-session outbound queues
//! - `relay`: the broadcast relay that applies and fans out edits
//! - `document`: the shared document and its snapshot
//! - `message`: wire frames in both directions
//! - `error`: error types for the relay crate
//! - `server`: WebSocket server (requires the `server` feature)
//!
//! # Example
//!
//! ```
//! use relay::{BroadcastRelay, DocumentState, EditMessage, ServerMessage};
//! use tokio::sync::mpsc;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let relay = BroadcastRelay::new(DocumentState::default());
//!
//! let (tx1, _rx1) = mpsc::channel(16);
//! let (tx2, mut rx2) = mpsc::channel(16);
//! let alice = relay.admit(tx1).await;
//! let _bob = relay.admit(tx2).await;
//!
//! relay.handle_edit(alice, EditMessage::new("Hello")).await.unwrap();
//!
//! let update = rx2.recv().await.unwrap();
//! assert!(matches!(&*update, ServerMessage::ContentUpdate { content, .. } if content == "Hello"));
//! assert_eq!(relay.content().await, "Hello");
//! # });
//! ```

pub mod document;
pub mod error;
pub mod message;
pub mod relay;
pub mod session;

/// WebSocket relay server.
///
/// This module is only available when the `server` feature is enabled.
#[cfg(feature = "server")]
pub mod server;

pub use document::DocumentState;
pub use error::{DocumentError, RelayError, RelayResult};
pub use message::{EditMessage, ServerMessage};
pub use relay::{BroadcastRelay, DeliveryReport, HealthReport};
pub use session::{PeerReceiver, PeerSender, Session, SessionId, SessionRegistry, SessionState};
