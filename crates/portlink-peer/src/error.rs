use std::time::Duration;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] portlink_transport::TransportError),

    /// Envelope encoding/decoding error.
    #[error("wire error: {0}")]
    Wire(#[from] portlink_wire::WireError),

    /// Handshake could not proceed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No private port has been established yet.
    #[error("not connected")]
    NotConnected,

    /// The connection went away before the call settled.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Request was cancelled by the caller; carries the cancellation reason.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// A handler on the remote side failed; carries its message.
    #[error("{0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Failure reported by a local handler.
///
/// Only the message crosses the wire; the requester sees it as
/// [`PeerError::Remote`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message sent to the requester.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<PeerError> for HandlerError {
    fn from(err: PeerError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}
