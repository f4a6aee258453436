//! Private-port handshake and request/response RPC between a host context
//! and the context it embeds.
//!
//! # Crate Structure
//!
//! - [`transport`]: windows, frames and entangled message ports
//! - [`wire`]: the `{action, data}` envelope and its per-direction actions
//! - [`peer`]: host/client handshake, dispatch and correlation (behind the
//!   `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use portlink_transport::*;
}

/// Re-export envelope types.
pub mod wire {
    pub use portlink_wire::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use portlink_peer::*;
}

#[cfg(feature = "peer")]
pub use portlink_peer::{
    CancelToken, Client, ClientBuilder, Handler, HandlerError, Host, HostBuilder, PeerError,
    RequestOptions,
};
