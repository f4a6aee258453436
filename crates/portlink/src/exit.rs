use std::fmt;
use std::io;

use portlink_peer::PeerError;
use portlink_transport::TransportError;
use portlink_wire::WireError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(INTERNAL, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Wire(err) => wire_error(context, err),
        PeerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::Cancelled(_)
        | PeerError::Remote(_)
        | PeerError::Disconnected(_)
        | PeerError::NotConnected
        | PeerError::HandshakeFailed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn maps_peer_errors_to_exit_codes() {
        assert_eq!(
            peer_error("probe", PeerError::Timeout(Duration::from_millis(5))).code,
            TIMEOUT
        );
        assert_eq!(
            peer_error("probe", PeerError::Remote("boom".into())).code,
            FAILURE
        );
        assert_eq!(
            peer_error("probe", PeerError::Transport(TransportError::PortClosed)).code,
            TRANSPORT_ERROR
        );
        let wire = WireError::TooLarge { size: 10, max: 5 };
        assert_eq!(peer_error("probe", PeerError::Wire(wire)).code, DATA_INVALID);
    }

    #[test]
    fn message_carries_context() {
        let err = peer_error("handshake", PeerError::NotConnected);
        assert_eq!(err.to_string(), "handshake: not connected");
    }
}
