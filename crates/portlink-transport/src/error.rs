/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The port was closed locally or its entangled half went away.
    #[error("message port closed")]
    PortClosed,

    /// The port's inbound queue has already been claimed by a listener.
    #[error("message port already started")]
    AlreadyStarted,

    /// The embedded frame could not be attached to its container.
    #[error("failed to attach frame: {0}")]
    Attach(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
