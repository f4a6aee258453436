use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use portlink_transport::{EmbeddedFrame, Window};
use tracing::Span;

use crate::client::Client;
use crate::host::Host;
use crate::origin::TargetOrigin;
use crate::registry::{Handler, HandlerId, HandlerRegistry};

/// Default time a request waits for its response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Convert a millisecond setting; negative means wait forever.
fn timeout_from_millis(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().map(Duration::from_millis)
}

/// Collects handlers and options for a [`Host`].
pub struct HostBuilder {
    window: Window,
    frame: Arc<dyn EmbeddedFrame>,
    target: TargetOrigin,
    registry: HandlerRegistry,
    default_timeout: Option<Duration>,
    span: Option<Span>,
}

impl HostBuilder {
    /// `window` is the host's own context; `frame` embeds the client.
    pub fn new(window: Window, frame: Arc<dyn EmbeddedFrame>) -> Self {
        Self {
            window,
            frame,
            target: TargetOrigin::Unrestricted,
            registry: HandlerRegistry::new(),
            default_timeout: Some(DEFAULT_TIMEOUT),
            span: None,
        }
    }

    pub fn on(self, event_name: impl Into<String>, handler: Handler) -> Self {
        self.registry.on(event_name, handler);
        self
    }

    /// Register a handler and keep its id for a later [`off`](Self::off).
    pub fn add_handler(&self, event_name: impl Into<String>, handler: Handler) -> HandlerId {
        self.registry.on(event_name, handler)
    }

    pub fn off(&self, event_name: &str, id: HandlerId) -> bool {
        self.registry.off(event_name, id)
    }

    /// Only accept a handshake from this origin (`*` for any).
    pub fn with_target_origin(mut self, origin: impl Into<TargetOrigin>) -> Self {
        self.target = origin.into();
        self
    }

    /// Default request timeout in milliseconds; negative waits forever.
    pub fn with_default_timeout(mut self, millis: i64) -> Self {
        self.default_timeout = timeout_from_millis(millis);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Parent span for everything the host logs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Host {
        let span = self
            .span
            .unwrap_or_else(|| tracing::debug_span!("host", window = %self.window.id()));
        Host::from_parts(
            self.window,
            self.frame,
            self.target,
            self.registry,
            self.default_timeout,
            span,
        )
    }
}

impl fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuilder")
            .field("window", &self.window)
            .field("target", &self.target)
            .field("registry", &self.registry)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Collects handlers and options for a [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    window: Window,
    parent: Window,
    target: TargetOrigin,
    registry: HandlerRegistry,
    default_timeout: Option<Duration>,
    span: Option<Span>,
}

impl ClientBuilder {
    /// `window` is the client's own context; `parent` is the host's.
    pub fn new(window: Window, parent: Window) -> Self {
        Self {
            window,
            parent,
            target: TargetOrigin::Any,
            registry: HandlerRegistry::new(),
            default_timeout: Some(DEFAULT_TIMEOUT),
            span: None,
        }
    }

    pub fn on(self, event_name: impl Into<String>, handler: Handler) -> Self {
        self.registry.on(event_name, handler);
        self
    }

    pub fn add_handler(&self, event_name: impl Into<String>, handler: Handler) -> HandlerId {
        self.registry.on(event_name, handler)
    }

    pub fn off(&self, event_name: &str, id: HandlerId) -> bool {
        self.registry.off(event_name, id)
    }

    /// Origin the parent must have for the offer to be delivered.
    pub fn with_target_origin(mut self, origin: impl Into<TargetOrigin>) -> Self {
        self.target = origin.into();
        self
    }

    pub fn with_default_timeout(mut self, millis: i64) -> Self {
        self.default_timeout = timeout_from_millis(millis);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Client {
        let span = self
            .span
            .unwrap_or_else(|| tracing::debug_span!("client", window = %self.window.id()));
        Client::from_parts(
            self.window,
            self.parent,
            self.target,
            self.registry,
            self.default_timeout,
            span,
        )
    }
}
