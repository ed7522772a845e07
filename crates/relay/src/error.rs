//! Error types for the relay crate.

use crate::session::SessionId;
use thiserror::Error;

/// Result type alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur while relaying edits between sessions.
///
/// None of these are fatal to the process. Each one is scoped to a
/// single frame or a single session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Inbound frame is malformed or missing the `content` field.
    /// The frame is dropped and the connection stays open.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Delivery to a peer failed; the peer is treated as disconnected.
    #[error("Peer unreachable: {peer} ({reason})")]
    PeerUnreachable { peer: SessionId, reason: String },

    /// The session is no longer registered.
    #[error("Connection closed: {0}")]
    ConnectionClosed(SessionId),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::InvalidMessage(e.to_string())
    }
}

/// Errors that can occur when loading the seed document.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// The document file could not be read.
    #[error("Failed to read document: {0}")]
    Io(#[from] std::io::Error),

    /// The document file is not valid JSON.
    #[error("Failed to parse document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document's top-level value is not an object.
    #[error("Document must be a JSON object, found {0}")]
    NotAnObject(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::InvalidMessage("missing field `content`".to_string());
        assert_eq!(err.to_string(), "Invalid message: missing field `content`");

        let err = RelayError::ConnectionClosed(SessionId(7));
        assert_eq!(err.to_string(), "Connection closed: Session(7)");

        let err = RelayError::PeerUnreachable {
            peer: SessionId(3),
            reason: "outbox full".to_string(),
        };
        assert_eq!(err.to_string(), "Peer unreachable: Session(3) (outbox full)");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: RelayError = json_err.into();
        assert!(matches!(err, RelayError::InvalidMessage(_)));
    }
}
