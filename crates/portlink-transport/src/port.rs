use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tracing::trace;

use crate::error::{Result, TransportError};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// A private, two-ended message channel.
///
/// Both halves are created together and are entangled: a message posted on
/// one half is delivered to the other, in posting order. Nothing outside the
/// two holders can observe or inject traffic.
#[derive(Debug)]
pub struct MessageChannel {
    pub port1: MessagePort,
    pub port2: MessagePort,
}

impl MessageChannel {
    /// Create a new entangled port pair.
    pub fn new() -> Self {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        // port1 posts into port2's queue and vice versa.
        let port1 = MessagePort::from_parts(tx2, rx1);
        let port2 = MessagePort::from_parts(tx1, rx2);
        trace!(port1 = port1.id(), port2 = port2.id(), "message channel created");

        Self { port1, port2 }
    }

    /// Split into the two halves.
    pub fn into_ports(self) -> (MessagePort, MessagePort) {
        (self.port1, self.port2)
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// One half of a [`MessageChannel`].
///
/// Handles are cheap to clone and refer to the same endpoint; this is what
/// allows a port to ride along in a [`WindowMessage`](crate::WindowMessage)
/// that several listeners observe. Only one of them can [`start`](Self::start)
/// it, which is what makes the endpoint a capability.
#[derive(Clone)]
pub struct MessagePort {
    inner: Arc<PortInner>,
}

struct PortInner {
    id: u64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl MessagePort {
    fn from_parts(
        outbound: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            inner: Arc::new(PortInner {
                id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
                outbound: Mutex::new(Some(outbound)),
                inbound: Mutex::new(Some(inbound)),
                closed: AtomicBool::new(false),
                close_signal: Notify::new(),
            }),
        }
    }

    /// Process-unique identifier, for logging.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Post a message to the entangled half.
    pub fn post_message(&self, data: impl Into<Bytes>) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::PortClosed);
        }

        let data = data.into();
        let guard = lock(&self.inner.outbound);
        let sender = guard.as_ref().ok_or(TransportError::PortClosed)?;
        trace!(port = self.inner.id, len = data.len(), "port post");
        sender.send(data).map_err(|_| TransportError::PortClosed)
    }

    /// Claim the inbound queue of this port.
    ///
    /// A port has exactly one listener; a second call fails with
    /// [`TransportError::AlreadyStarted`].
    pub fn start(&self) -> Result<PortReceiver> {
        if self.is_closed() {
            return Err(TransportError::PortClosed);
        }

        let rx = lock(&self.inner.inbound)
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        Ok(PortReceiver {
            port: self.inner.clone(),
            rx,
        })
    }

    /// Disentangle this port.
    ///
    /// Posting on either side stops being delivered, and a pending
    /// [`PortReceiver::recv`] on this side returns `None`.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        lock(&self.inner.outbound).take();
        lock(&self.inner.inbound).take();
        self.inner.close_signal.notify_waiters();
        trace!(port = self.inner.id, "port closed");
    }

    /// Whether [`close`](Self::close) has been called on this endpoint.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same endpoint.
    pub fn same_port(&self, other: &MessagePort) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The listening side of a started [`MessagePort`].
pub struct PortReceiver {
    port: Arc<PortInner>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl PortReceiver {
    /// Receive the next message.
    ///
    /// Returns `None` once the port is closed locally, or once the entangled
    /// half is gone and every queued message has been drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        let notified = self.port.close_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.port.closed.load(Ordering::Acquire) {
            return None;
        }

        tokio::select! {
            biased;
            _ = &mut notified => None,
            msg = self.rx.recv() => msg,
        }
    }

    /// Poll for the next message without observing a concurrent close.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        if self.port.closed.load(Ordering::Acquire) {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }

    /// Identifier of the port this receiver belongs to.
    pub fn port_id(&self) -> u64 {
        self.port.id
    }
}

impl fmt::Debug for PortReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortReceiver")
            .field("port", &self.port.id)
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
