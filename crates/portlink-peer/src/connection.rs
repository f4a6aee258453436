use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use portlink_wire::{ClientMessage, Envelope, HostMessage, Rpc};
use serde_json::Value;
use tokio::sync::oneshot::error::RecvError;
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::driver::{DriverGuard, Shared};
use crate::error::{PeerError, Result};

/// Per-call cancellation choices for [`Connection::send_and_receive`].
///
/// Supplying a token replaces the default timeout for that call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub cancel: Option<CancelToken>,
    /// Ask the peer to expose a cancellation signal to its handlers and
    /// forward the cancellation to it.
    pub propagate: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }
}

/// Handle for talking to the connected peer.
///
/// `O` is the envelope type this side sends; see [`HostConnection`] and
/// [`ClientConnection`]. Clones share one connection.
pub struct Connection<O: Envelope> {
    shared: Arc<Shared<O>>,
    _guard: Arc<DriverGuard<O>>,
}

/// Connection held by the host.
pub type HostConnection = Connection<HostMessage>;

/// Connection held by the client.
pub type ClientConnection = Connection<ClientMessage>;

impl<O: Envelope + Send + 'static> Connection<O> {
    pub(crate) fn new(shared: Arc<Shared<O>>, guard: Arc<DriverGuard<O>>) -> Self {
        Self {
            shared,
            _guard: guard,
        }
    }

    /// Fire-and-forget delivery of `event_name`.
    ///
    /// Only local failures are reported; whether the peer handles the event
    /// is never known.
    pub fn send(&self, event_name: &str, payload: Vec<Value>) -> Result<()> {
        self.shared.post(&O::from_rpc(Rpc::Event {
            event_name: event_name.to_string(),
            payload,
        }))
    }

    /// Send a request with the default options.
    pub fn request(&self, event_name: &str, payload: Vec<Value>) -> ResponseFuture {
        self.send_and_receive(event_name, payload, RequestOptions::default())
    }

    /// Send a request and wait for the ordered results of the peer's
    /// handlers.
    ///
    /// The request is posted before this returns. The future resolves with
    /// the first of: the response, an error response
    /// ([`PeerError::Remote`]), cancellation through `options.cancel`
    /// ([`PeerError::Cancelled`]), or the default timeout
    /// ([`PeerError::Timeout`]) when no token was supplied. Without a token
    /// and without a default timeout it waits until a reply arrives.
    /// Expiry and cancellation take effect when they happen, even while the
    /// future is not being polled. Dropping the future abandons the request.
    pub fn send_and_receive(
        &self,
        event_name: &str,
        payload: Vec<Value>,
        options: RequestOptions,
    ) -> ResponseFuture {
        let shared = &self.shared;
        let (sequence, reply) = shared.correlator.register(event_name);
        let RequestOptions { cancel, propagate } = options;

        let request = O::from_rpc(Rpc::Request {
            event_name: event_name.to_string(),
            payload,
            sequence,
            signal: cancel.is_some() && propagate,
        });
        if let Err(err) = shared.post(&request) {
            shared.correlator.forget(sequence);
            return ResponseFuture::failed(sequence, err);
        }

        // Expiry and cancellation settle the record themselves, whether or
        // not the caller is polling. The deadline counts from the send.
        let watcher = match (cancel, shared.default_timeout) {
            (Some(token), _) => Some(shared.spawn(watch_cancel(
                shared.clone(),
                event_name.to_string(),
                sequence,
                token,
                propagate,
            ))),
            (None, Some(after)) => Some(shared.spawn(expire(
                shared.clone(),
                event_name.to_string(),
                sequence,
                after,
                Instant::now() + after,
            ))),
            (None, None) => None,
        };
        let pending = Pending {
            shared: shared.clone(),
            sequence,
            watcher,
        };

        let inner = async move {
            let _pending = pending;
            flatten(reply.await)
        };
        ResponseFuture {
            sequence,
            inner: inner.boxed(),
        }
    }

    /// Number of requests from this side still awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    /// Identifier of the private port currently in use.
    pub fn port_id(&self) -> Option<u64> {
        self.shared.port_id()
    }
}

impl<O: Envelope> Clone for Connection<O> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _guard: self._guard.clone(),
        }
    }
}

impl<O: Envelope> fmt::Debug for Connection<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("direction", &O::DIRECTION)
            .field("pending", &self.shared.correlator.pending_count())
            .finish()
    }
}

fn flatten(outcome: std::result::Result<Result<Vec<Value>>, RecvError>) -> Result<Vec<Value>> {
    outcome.unwrap_or_else(|_| Err(PeerError::Disconnected("request dropped".to_string())))
}

async fn expire<O: Envelope>(
    shared: Arc<Shared<O>>,
    event_name: String,
    sequence: u64,
    after: Duration,
    at: Instant,
) {
    sleep_until(at).await;
    if shared
        .correlator
        .settle(sequence, Err(PeerError::Timeout(after)))
    {
        debug!(event = %event_name, sequence, ?after, "request timed out");
    }
}

async fn watch_cancel<O: Envelope>(
    shared: Arc<Shared<O>>,
    event_name: String,
    sequence: u64,
    token: CancelToken,
    propagate: bool,
) {
    let reason = token.cancelled().await;
    if !shared
        .correlator
        .settle(sequence, Err(PeerError::Cancelled(reason.clone())))
    {
        return;
    }
    debug!(event = %event_name, sequence, %reason, "request cancelled");
    if propagate {
        let abort = O::from_rpc(Rpc::Abort {
            event_name,
            reason,
            sequence,
        });
        if let Err(err) = shared.post(&abort) {
            debug!(error = %err, "abort not delivered");
        }
    }
}

/// Removes the pending record and stops its timer or cancel watcher once
/// the call's future is gone.
struct Pending<O: Envelope> {
    shared: Arc<Shared<O>>,
    sequence: u64,
    watcher: Option<AbortHandle>,
}

impl<O: Envelope> Drop for Pending<O> {
    fn drop(&mut self) {
        self.shared.correlator.forget(self.sequence);
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Outcome of [`Connection::send_and_receive`].
#[must_use = "dropping the future abandons the request"]
pub struct ResponseFuture {
    sequence: u64,
    inner: BoxFuture<'static, Result<Vec<Value>>>,
}

impl ResponseFuture {
    fn failed(sequence: u64, err: PeerError) -> Self {
        Self {
            sequence,
            inner: futures_util::future::ready(Err(err)).boxed(),
        }
    }

    /// Sequence number the request was sent with.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Future for ResponseFuture {
    type Output = Result<Vec<Value>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("sequence", &self.sequence)
            .finish()
    }
}
