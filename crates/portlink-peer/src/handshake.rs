//! Handshake states.
//!
//! Host: `Connecting` → (Syn adopted, SynAck sent) `HandshakeAcked` →
//! (Ack received) `Connected`. An accepted re-handshake moves a connected
//! host back to `HandshakeAcked`. Which re-handshakes are accepted is
//! decided by the window-message guard in [`origin`](crate::origin).
//!
//! Client: `Connecting` → (Syn posted with the port) `HandshakeSent` →
//! (SynAck received, Ack sent) `Connected`.

use std::fmt;

/// Host-side connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    Connecting,
    HandshakeAcked,
    Connected,
}

/// Client-side connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Connecting,
    HandshakeSent,
    Connected,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::HandshakeAcked => "handshake-acked",
            Self::Connected => "connected",
        })
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::HandshakeSent => "handshake-sent",
            Self::Connected => "connected",
        })
    }
}
