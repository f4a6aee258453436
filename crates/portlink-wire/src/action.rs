//! Action codes carried in the `action` field of every envelope.
//!
//! Each direction has its own enumeration; a value is only meaningful
//! together with the direction it travels in. Codes are append-only: new
//! members go at the end and existing codes are never renumbered, otherwise
//! peers built from different releases stop understanding each other.

/// Actions sent from the client (embedded context) to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientAction {
    /// Handshake initiation, sent on the window scope with a port attached.
    Syn = 0,
    /// Handshake confirmation, sent on the private port.
    Ack = 1,
    /// Fire-and-forget event.
    Message = 2,
    /// Event that expects a response.
    MessageWithResponse = 3,
    /// Successful response.
    Response = 4,
    /// Error response.
    ResponseError = 5,
    /// Cancellation of an in-flight request.
    AbortMessage = 6,
}

/// Actions sent from the host to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HostAction {
    /// Handshake acknowledgement, sent on the private port.
    SynAck = 0,
    /// Fire-and-forget event.
    Message = 1,
    /// Event that expects a response.
    MessageWithResponse = 2,
    /// Successful response.
    Response = 3,
    /// Error response.
    ResponseError = 4,
    /// Cancellation of an in-flight request.
    AbortMessage = 5,
}

impl ClientAction {
    /// Wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up an action by wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Syn),
            1 => Some(Self::Ack),
            2 => Some(Self::Message),
            3 => Some(Self::MessageWithResponse),
            4 => Some(Self::Response),
            5 => Some(Self::ResponseError),
            6 => Some(Self::AbortMessage),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Syn => "Syn",
            Self::Ack => "Ack",
            Self::Message => "Message",
            Self::MessageWithResponse => "MessageWithResponse",
            Self::Response => "Response",
            Self::ResponseError => "ResponseError",
            Self::AbortMessage => "AbortMessage",
        }
    }
}

impl HostAction {
    /// Wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up an action by wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::SynAck),
            1 => Some(Self::Message),
            2 => Some(Self::MessageWithResponse),
            3 => Some(Self::Response),
            4 => Some(Self::ResponseError),
            5 => Some(Self::AbortMessage),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::SynAck => "SynAck",
            Self::Message => "Message",
            Self::MessageWithResponse => "MessageWithResponse",
            Self::Response => "Response",
            Self::ResponseError => "ResponseError",
            Self::AbortMessage => "AbortMessage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pinned values: changing any of these is a wire break.
    #[test]
    fn client_codes_are_stable() {
        assert_eq!(ClientAction::Syn.code(), 0);
        assert_eq!(ClientAction::Ack.code(), 1);
        assert_eq!(ClientAction::Message.code(), 2);
        assert_eq!(ClientAction::MessageWithResponse.code(), 3);
        assert_eq!(ClientAction::Response.code(), 4);
        assert_eq!(ClientAction::ResponseError.code(), 5);
        assert_eq!(ClientAction::AbortMessage.code(), 6);
    }

    #[test]
    fn host_codes_are_stable() {
        assert_eq!(HostAction::SynAck.code(), 0);
        assert_eq!(HostAction::Message.code(), 1);
        assert_eq!(HostAction::MessageWithResponse.code(), 2);
        assert_eq!(HostAction::Response.code(), 3);
        assert_eq!(HostAction::ResponseError.code(), 4);
        assert_eq!(HostAction::AbortMessage.code(), 5);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(ClientAction::from_code(7).is_none());
        assert!(HostAction::from_code(6).is_none());
        assert_eq!(HostAction::from_code(2), Some(HostAction::MessageWithResponse));
    }
}
