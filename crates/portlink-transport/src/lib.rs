//! Transport layer for portlink.
//!
//! Models the two kinds of delivery an embedded context gets from its
//! environment:
//! - [`Window`]: a context-wide scope where any context may post, every
//!   listener observes the message, and the sender's identity and origin are
//!   stamped by the transport
//! - [`MessageChannel`]: a private pair of entangled [`MessagePort`]s with
//!   FIFO delivery, one half of which can be transferred alongside a window
//!   message
//!
//! This is the lowest layer. Everything else builds on the types here.

pub mod error;
pub mod frame;
pub mod port;
pub mod window;

pub use error::{Result, TransportError};
pub use frame::{EmbeddedFrame, InlineFrame};
pub use port::{MessageChannel, MessagePort, PortReceiver};
pub use window::{ContextId, Window, WindowEvents, WindowMessage, WILDCARD_ORIGIN};
