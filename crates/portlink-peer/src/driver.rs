use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portlink_transport::MessagePort;
use portlink_wire::Envelope;
use tokio::task::AbortHandle;
use tracing::{debug, Instrument, Span};

use crate::correlator::Correlator;
use crate::error::{PeerError, Result};
use crate::lock;
use crate::registry::HandlerRegistry;

/// State shared by a peer, its connection handles and its background tasks.
///
/// `O` is the envelope type this side sends.
pub(crate) struct Shared<O> {
    pub(crate) registry: HandlerRegistry,
    pub(crate) correlator: Correlator,
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) span: Span,
    outbox: Mutex<Option<MessagePort>>,
    port_task: Mutex<Option<AbortHandle>>,
    tasks: Mutex<Vec<AbortHandle>>,
    _direction: PhantomData<fn(O)>,
}

impl<O: Envelope> Shared<O> {
    pub(crate) fn new(
        registry: HandlerRegistry,
        default_timeout: Option<Duration>,
        span: Span,
    ) -> Self {
        Self {
            registry,
            correlator: Correlator::new(),
            default_timeout,
            span,
            outbox: Mutex::new(None),
            port_task: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            _direction: PhantomData,
        }
    }

    /// Encode `msg` and post it on the current private port.
    pub(crate) fn post(&self, msg: &O) -> Result<()> {
        let data = msg.encode()?;
        let outbox = lock(&self.outbox);
        let port = outbox.as_ref().ok_or(PeerError::NotConnected)?;
        port.post_message(data)?;
        debug!(parent: &self.span, action = msg.action_name(), port = port.id(), "envelope sent");
        Ok(())
    }

    /// Make `port` the private port, closing the one it replaces and
    /// stopping that port's listener.
    pub(crate) fn adopt_port(&self, port: MessagePort, listener: AbortHandle) {
        let new_id = port.id();
        if let Some(old) = lock(&self.outbox).replace(port) {
            debug!(parent: &self.span, old = old.id(), new = new_id, "private port replaced");
            old.close();
        }
        if let Some(old) = lock(&self.port_task).replace(listener) {
            old.abort();
        }
    }

    pub(crate) fn has_port(&self) -> bool {
        lock(&self.outbox).is_some()
    }

    pub(crate) fn port_id(&self) -> Option<u64> {
        lock(&self.outbox).as_ref().map(MessagePort::id)
    }

    /// Spawn a background task that lives until shutdown, inside this
    /// peer's span.
    pub(crate) fn spawn<F>(&self, fut: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(fut.instrument(self.span.clone())).abort_handle()
    }

    pub(crate) fn track(&self, task: AbortHandle) {
        lock(&self.tasks).push(task);
    }

    fn shutdown(&self, reason: &str) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        if let Some(task) = lock(&self.port_task).take() {
            task.abort();
        }
        if let Some(port) = lock(&self.outbox).take() {
            port.close();
        }
        let failed = self.correlator.fail_all(reason);
        debug!(parent: &self.span, failed, reason, "peer shut down");
    }
}

/// Tears the peer down once the last user-facing handle is gone.
///
/// Background tasks hold [`Shared`] but never this guard.
pub(crate) struct DriverGuard<O: Envelope> {
    shared: Arc<Shared<O>>,
    reason: &'static str,
}

impl<O: Envelope> DriverGuard<O> {
    pub(crate) fn new(shared: Arc<Shared<O>>, reason: &'static str) -> Self {
        Self { shared, reason }
    }
}

impl<O: Envelope> Drop for DriverGuard<O> {
    fn drop(&mut self) {
        self.shared.shutdown(self.reason);
    }
}
