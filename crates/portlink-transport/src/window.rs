use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::port::{lock, MessagePort};

/// Target origin that matches any receiving window.
pub const WILDCARD_ORIGIN: &str = "*";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an execution context.
///
/// Stamped by the transport onto every [`WindowMessage`], so a receiver can
/// tell which context really sent a message regardless of what it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A message delivered through a window's context-wide scope.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    /// Context that posted the message.
    pub source: ContextId,
    /// Origin of the posting context.
    pub origin: String,
    /// Encoded message body.
    pub data: Bytes,
    /// Ports transferred together with the message.
    pub ports: Vec<MessagePort>,
}

/// One execution context with a context-wide message scope.
///
/// Handles are cheap to clone and refer to the same context.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

struct WindowInner {
    id: ContextId,
    origin: String,
    listeners: Mutex<Vec<mpsc::UnboundedSender<WindowMessage>>>,
}

impl Window {
    /// Create a new context with the given origin.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                origin: origin.into(),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Identity of this context.
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Origin of this context.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    /// Install a listener. Every message posted to this window after the
    /// call is delivered to it until the returned stream is dropped.
    pub fn listen(&self) -> WindowEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.listeners).push(tx);
        WindowEvents { rx }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        let mut listeners = lock(&self.inner.listeners);
        listeners.retain(|tx| !tx.is_closed());
        listeners.len()
    }

    /// Post a message into this window on behalf of `source`.
    ///
    /// The delivered message carries `source`'s identity and origin. When
    /// `target_origin` is neither [`WILDCARD_ORIGIN`] nor this window's
    /// origin, nothing is delivered. Returns the number of listeners reached.
    pub fn post_message(
        &self,
        source: &Window,
        data: impl Into<Bytes>,
        target_origin: &str,
        transfer: Vec<MessagePort>,
    ) -> usize {
        if target_origin != WILDCARD_ORIGIN && target_origin != self.origin() {
            trace!(
                window = %self.id(),
                target_origin,
                origin = self.origin(),
                "window message dropped: target origin mismatch"
            );
            return 0;
        }

        let message = WindowMessage {
            source: source.id(),
            origin: source.origin().to_string(),
            data: data.into(),
            ports: transfer,
        };

        let mut listeners = lock(&self.inner.listeners);
        listeners.retain(|tx| tx.send(message.clone()).is_ok());
        trace!(
            window = %self.id(),
            source = %message.source,
            listeners = listeners.len(),
            "window message posted"
        );
        listeners.len()
    }

    /// Whether both handles refer to the same context.
    pub fn same_window(&self, other: &Window) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .finish()
    }
}

/// Stream of messages delivered to one window listener.
#[derive(Debug)]
pub struct WindowEvents {
    rx: mpsc::UnboundedReceiver<WindowMessage>,
}

impl WindowEvents {
    /// Receive the next message; `None` once the window is gone.
    pub async fn recv(&mut self) -> Option<WindowMessage> {
        self.rx.recv().await
    }
}

impl futures_core::Stream for WindowEvents {
    type Item = WindowMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
