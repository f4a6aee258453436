//! Inbound routing for a connected private port.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::future::{join_all, BoxFuture};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use portlink_transport::{MessagePort, PortReceiver};
use portlink_wire::{Envelope, Rpc};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::driver::Shared;
use crate::error::{HandlerError, PeerError};
use crate::lock;
use crate::registry::{Handler, HandlerContext};

/// Cancellation controllers for requests this side is answering.
type CancelMap = Arc<Mutex<HashMap<(String, u64), CancelToken>>>;

/// Handler work for messages already read from the port.
type Inflight = FuturesUnordered<BoxFuture<'static, ()>>;

/// Listen on `receiver` until the port closes.
///
/// `I` is the envelope type arriving on the port, `O` the type sent back on
/// `port`. Handshake envelopes are passed to `on_control`.
///
/// Handler work is polled on this listener's task, never spawned: handlers
/// for one port never run in parallel, each starts in the order its message
/// arrived, and stopping the listener drops them.
pub(crate) async fn run_port<I, O, F>(
    shared: Arc<Shared<O>>,
    port: MessagePort,
    mut receiver: PortReceiver,
    mut on_control: F,
) where
    I: Envelope,
    O: Envelope + Send + 'static,
    F: FnMut(I) + Send,
{
    let cancels: CancelMap = Arc::default();
    let mut inflight = Inflight::new();
    debug!(port = port.id(), "port listener started");

    loop {
        tokio::select! {
            biased;
            // Drain runnable handler work before reading the next envelope.
            Some(()) = inflight.next(), if !inflight.is_empty() => {}
            data = receiver.recv() => {
                let Some(data) = data else { break };
                let msg = match I::decode(&data) {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(direction = I::DIRECTION, error = %err, "dropping undecodable envelope");
                        continue;
                    }
                };
                trace!(action = msg.action_name(), "envelope received");
                match msg.into_rpc() {
                    Ok(rpc) => route(&shared, &port, &cancels, &mut inflight, rpc),
                    Err(control) => on_control(control),
                }
            }
        }
    }

    debug!(port = port.id(), "port listener stopped");
}

fn route<O>(
    shared: &Arc<Shared<O>>,
    port: &MessagePort,
    cancels: &CancelMap,
    inflight: &mut Inflight,
    rpc: Rpc,
) where
    O: Envelope + Send + 'static,
{
    match rpc {
        Rpc::Event {
            event_name,
            payload,
        } => {
            let handlers = shared.registry.handlers(&event_name);
            if handlers.is_empty() {
                trace!(event = %event_name, "no handlers for event");
                return;
            }
            let ctx = HandlerContext {
                event_name,
                sequence: None,
                signal: None,
            };
            inflight.push(deliver_event(handlers, ctx, payload).boxed());
        }
        Rpc::Request {
            event_name,
            payload,
            sequence,
            signal,
        } => {
            let handlers = shared.registry.handlers(&event_name);
            if handlers.is_empty() {
                debug!(event = %event_name, sequence, "no handlers for request; leaving it unanswered");
                return;
            }
            let signal = signal.then(|| {
                let token = CancelToken::new();
                lock(cancels).insert((event_name.clone(), sequence), token.clone());
                token
            });
            let ctx = HandlerContext {
                event_name,
                sequence: Some(sequence),
                signal,
            };
            inflight.push(
                answer::<O>(port.clone(), cancels.clone(), handlers, ctx, payload).boxed(),
            );
        }
        Rpc::Response {
            event_name,
            payload,
            sequence,
        } => {
            if !shared.correlator.settle(sequence, Ok(payload)) {
                debug!(event = %event_name, sequence, "dropping response for unknown sequence");
            }
        }
        Rpc::ResponseError {
            event_name,
            message,
            sequence,
        } => {
            if !shared
                .correlator
                .settle(sequence, Err(PeerError::Remote(message)))
            {
                debug!(event = %event_name, sequence, "dropping error response for unknown sequence");
            }
        }
        Rpc::Abort {
            event_name,
            reason,
            sequence,
        } => {
            let token = lock(cancels).remove(&(event_name, sequence));
            match token {
                Some(token) => {
                    debug!(sequence, %reason, "request cancelled by peer");
                    token.cancel_with(reason);
                }
                None => trace!(sequence, "abort for settled or uncancellable request"),
            }
        }
    }
}

/// Run one handler, turning a panic into an ordinary failure.
async fn invoke(
    handler: Handler,
    ctx: HandlerContext,
    payload: Vec<Value>,
) -> Result<Value, HandlerError> {
    AssertUnwindSafe(handler.call(ctx, payload))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(HandlerError::new("handler panicked")))
}

async fn deliver_event(handlers: Vec<Handler>, ctx: HandlerContext, payload: Vec<Value>) {
    let calls = handlers
        .into_iter()
        .map(|handler| invoke(handler, ctx.clone(), payload.clone()));
    for outcome in join_all(calls).await {
        if let Err(err) = outcome {
            warn!(event = %ctx.event_name, error = %err, "event handler failed");
        }
    }
}

/// Run every handler for a request and reply once.
///
/// The first failure is answered as soon as it happens; the remaining
/// handlers still run to completion and their outcomes are discarded.
async fn answer<O: Envelope>(
    port: MessagePort,
    cancels: CancelMap,
    handlers: Vec<Handler>,
    ctx: HandlerContext,
    payload: Vec<Value>,
) {
    let event_name = ctx.event_name.clone();
    let Some(sequence) = ctx.sequence else {
        return;
    };
    let cancellable = ctx.signal.is_some();

    let mut results = vec![Value::Null; handlers.len()];
    let mut calls: FuturesUnordered<_> = handlers
        .into_iter()
        .enumerate()
        .map(|(slot, handler)| {
            invoke(handler, ctx.clone(), payload.clone()).map(move |outcome| (slot, outcome))
        })
        .collect();

    let mut answered = false;
    while let Some((slot, outcome)) = calls.next().await {
        match outcome {
            Ok(value) => results[slot] = value,
            Err(err) if !answered => {
                answered = true;
                debug!(event = %event_name, sequence, error = %err, "request handler failed");
                reply::<O>(
                    &port,
                    &cancels,
                    cancellable,
                    Rpc::ResponseError {
                        event_name: event_name.clone(),
                        message: err.to_string(),
                        sequence,
                    },
                );
            }
            Err(err) => trace!(sequence, error = %err, "later handler failure discarded"),
        }
    }

    if !answered {
        reply::<O>(
            &port,
            &cancels,
            cancellable,
            Rpc::Response {
                event_name,
                payload: results,
                sequence,
            },
        );
    }
}

fn reply<O: Envelope>(port: &MessagePort, cancels: &CancelMap, cancellable: bool, rpc: Rpc) {
    let Some(sequence) = rpc.sequence() else {
        return;
    };
    if cancellable {
        lock(cancels).remove(&(rpc.event_name().to_string(), sequence));
    }

    let reply = O::from_rpc(rpc);
    let sent = reply
        .encode()
        .map_err(PeerError::from)
        .and_then(|data| port.post_message(data).map_err(PeerError::from));
    match sent {
        Ok(()) => debug!(action = reply.action_name(), sequence, "reply sent"),
        Err(err) => debug!(sequence, error = %err, "reply not delivered"),
    }
}
