use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::HandlerError;

/// Identifies one registration so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// What a handler learns about the delivery besides its arguments.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Event the handler was registered for.
    pub event_name: String,
    /// Sequence of the request being answered; `None` for fire-and-forget
    /// events.
    pub sequence: Option<u64>,
    /// Present when the requester propagates cancellation for this request.
    pub signal: Option<CancelToken>,
}

pub type HandlerFuture = BoxFuture<'static, Result<Value, HandlerError>>;

type HandlerFn = dyn Fn(HandlerContext, Vec<Value>) -> HandlerFuture + Send + Sync;

/// A callback for one event name.
///
/// The payload elements arrive as positional arguments. For requests the
/// returned value becomes this handler's slot in the response array.
#[derive(Clone)]
pub struct Handler {
    func: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap an asynchronous handler.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(HandlerContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx, args| func(ctx, args).boxed()),
        }
    }

    /// Wrap a handler that completes immediately.
    pub fn sync<F>(func: F) -> Self
    where
        F: Fn(HandlerContext, Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        // Runs on first poll, so a panic surfaces inside the handler future.
        Self::new(move |ctx, args| {
            let func = func.clone();
            async move { func(ctx, args) }
        })
    }

    pub(crate) fn call(&self, ctx: HandlerContext, args: Vec<Value>) -> HandlerFuture {
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// Event name to ordered handlers, shared between the configuring code and
/// the dispatcher.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    handlers: HashMap<String, Vec<(HandlerId, Handler)>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `event_name`.
    pub fn on(&self, event_name: impl Into<String>, handler: Handler) -> HandlerId {
        let mut inner = self.write();
        inner.next_id += 1;
        let id = HandlerId(inner.next_id);
        inner
            .handlers
            .entry(event_name.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one registration. Returns whether it existed.
    pub fn off(&self, event_name: &str, id: HandlerId) -> bool {
        let mut inner = self.write();
        let Some(list) = inner.handlers.get_mut(event_name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            inner.handlers.remove(event_name);
        }
        removed
    }

    /// Snapshot of the handlers for `event_name`, in registration order.
    pub fn handlers(&self, event_name: &str) -> Vec<Handler> {
        self.read()
            .handlers
            .get(event_name)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, event_name: &str) -> bool {
        self.read().handlers.contains_key(event_name)
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("events", &self.event_names())
            .finish()
    }
}
