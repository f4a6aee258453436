//! Envelope format for the portlink protocol.
//!
//! Every message is a JSON object `{"action": <code>, "data": {...}}`:
//! - `action` is a small integer from a per-direction, append-only table
//!   ([`ClientAction`], [`HostAction`])
//! - `data` carries `eventName`, `payload`, and for correlated kinds
//!   `sequence` (plus `signal` on cancellable requests)
//!
//! Decoding is exhaustive: an envelope either maps onto a [`ClientMessage`]
//! or [`HostMessage`] variant, or it is rejected.

pub mod action;
pub mod codec;
pub mod error;

pub use action::{ClientAction, HostAction};
pub use codec::{
    ClientMessage, Envelope, HostMessage, Rpc, DEFAULT_ABORT_REASON, DEFAULT_MAX_ENVELOPE,
    MAX_HANDSHAKE_ENVELOPE,
};
pub use error::{Result, WireError};
