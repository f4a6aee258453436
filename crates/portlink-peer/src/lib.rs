//! Connection handshake and request/response engine.
//!
//! A [`Host`] embeds a frame and waits for the [`Client`] inside it to offer
//! a private port; once both sides have confirmed, each gets a
//! [`Connection`] for fire-and-forget events and correlated requests with
//! timeout and cancellation.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use portlink_peer::{ClientBuilder, Handler, HostBuilder};
//! use portlink_transport::{InlineFrame, Window};
//! use serde_json::json;
//!
//! # async fn run() -> portlink_peer::Result<()> {
//! let host_window = Window::new("https://host.example");
//! let child_window = Window::new("https://child.example");
//! let frame = Arc::new(InlineFrame::with_content(&child_window));
//!
//! let host = HostBuilder::new(host_window.clone(), frame).build();
//! let client = ClientBuilder::new(child_window, host_window)
//!     .on("echo", Handler::sync(|_, args| Ok(json!(args))))
//!     .build();
//!
//! host.start()?;
//! let (to_client, _to_host) = tokio::try_join!(host.connect(), client.connect())?;
//! let results = to_client.request("echo", vec![json!("hi")]).await?;
//! assert_eq!(results, vec![json!(["hi"])]);
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod builder;
pub mod cancel;
pub mod client;
pub mod connection;
mod correlator;
mod dispatcher;
mod driver;
pub mod error;
pub mod handshake;
pub mod host;
pub mod origin;
pub mod registry;

pub use builder::{ClientBuilder, HostBuilder, DEFAULT_TIMEOUT};
pub use cancel::CancelToken;
pub use client::Client;
pub use connection::{ClientConnection, Connection, HostConnection, RequestOptions, ResponseFuture};
pub use error::{HandlerError, PeerError, Result};
pub use handshake::{ClientState, HostState};
pub use host::Host;
pub use origin::{GuardRejection, TargetOrigin};
pub use registry::{Handler, HandlerContext, HandlerId, HandlerRegistry};

// A poisoned lock only means a handler panicked elsewhere; the maps stay usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use portlink_transport::{InlineFrame, Window};
    use serde_json::json;

    use super::*;

    fn pair() -> (Host, Client) {
        let host_window = Window::new("https://host.example");
        let child_window = Window::new("https://child.example");
        let frame = Arc::new(InlineFrame::with_content(&child_window));
        let host = HostBuilder::new(host_window.clone(), frame)
            .with_target_origin("https://child.example")
            .build();
        let client = ClientBuilder::new(child_window, host_window)
            .with_target_origin("https://host.example")
            .build();
        (host, client)
    }

    #[tokio::test]
    async fn roundtrip_both_directions() {
        let (host, client) = pair();
        host.on("double", Handler::sync(|_, args| {
            let n = args.first().and_then(|v| v.as_i64()).unwrap_or_default();
            Ok(json!(n * 2))
        }));
        client.on(
            "greet",
            Handler::new(|_, args| async move {
                tokio::task::yield_now().await;
                Ok(json!(format!("hello {}", args[0].as_str().unwrap_or("?"))))
            }),
        );

        host.start().unwrap();
        let (to_client, to_host) = tokio::try_join!(host.connect(), client.connect()).unwrap();

        assert_eq!(
            to_client.request("greet", vec![json!("host")]).await.unwrap(),
            vec![json!("hello host")]
        );
        assert_eq!(
            to_host.request("double", vec![json!(21)]).await.unwrap(),
            vec![json!(42)]
        );
        assert_eq!(host.state(), HostState::Connected);
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test]
    async fn handlers_registered_after_connect_are_used() {
        let (host, client) = pair();
        host.start().unwrap();
        let (to_client, _to_host) = tokio::try_join!(host.connect(), client.connect()).unwrap();

        let id = client.on("late", Handler::sync(|_, _| Ok(json!("first"))));
        client.on("late", Handler::sync(|_, _| Ok(json!("second"))));
        assert_eq!(
            to_client.request("late", vec![]).await.unwrap(),
            vec![json!("first"), json!("second")]
        );

        assert!(client.off("late", id));
        assert_eq!(
            to_client.request("late", vec![]).await.unwrap(),
            vec![json!("second")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unhandled_request_times_out() {
        let host_window = Window::new("https://host.example");
        let child_window = Window::new("https://child.example");
        let frame = Arc::new(InlineFrame::with_content(&child_window));
        let host = HostBuilder::new(host_window.clone(), frame)
            .with_default_timeout(100)
            .build();
        let client = ClientBuilder::new(child_window, host_window).build();

        host.start().unwrap();
        let (to_client, _to_host) = tokio::try_join!(host.connect(), client.connect()).unwrap();
        let result = to_client.request("missing", vec![]).await;
        assert!(matches!(result, Err(PeerError::Timeout(d)) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn cancellation_reaches_remote_handler() {
        let (host, client) = pair();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let seen_tx = Arc::new(std::sync::Mutex::new(Some(seen_tx)));
        client.on(
            "long",
            Handler::new(move |ctx, _| {
                let seen_tx = seen_tx.clone();
                async move {
                    let Some(signal) = ctx.signal else {
                        return Err(HandlerError::new("no signal"));
                    };
                    let reason = signal.cancelled().await;
                    if let Some(tx) = lock(&seen_tx).take() {
                        let _ = tx.send(reason);
                    }
                    Ok(json!(null))
                }
            }),
        );

        host.start().unwrap();
        let (to_client, _to_host) = tokio::try_join!(host.connect(), client.connect()).unwrap();

        let token = CancelToken::new();
        let call = to_client.send_and_receive(
            "long",
            vec![],
            RequestOptions::new().with_cancel(token.clone()).propagate(true),
        );
        tokio::task::yield_now().await;
        token.cancel_with("closing");

        assert!(matches!(call.await, Err(PeerError::Cancelled(r)) if r == "closing"));
        assert_eq!(seen_rx.await.unwrap(), "closing");
    }
}
