use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portlink_transport::{MessageChannel, Window};
use portlink_wire::{ClientMessage, Envelope, HostMessage};
use tokio::sync::watch;
use tracing::{debug, info, Span};

use crate::connection::{ClientConnection, Connection};
use crate::dispatcher::run_port;
use crate::driver::{DriverGuard, Shared};
use crate::error::{PeerError, Result};
use crate::handshake::ClientState;
use crate::lock;
use crate::origin::TargetOrigin;
use crate::registry::{Handler, HandlerId, HandlerRegistry};

/// The embedded side of a connection.
///
/// Built with [`ClientBuilder`](crate::ClientBuilder) from the client's own
/// window and its parent's.
#[derive(Clone)]
pub struct Client {
    core: Arc<ClientCore>,
    guard: Arc<DriverGuard<ClientMessage>>,
}

struct ClientCore {
    shared: Arc<Shared<ClientMessage>>,
    window: Window,
    parent: Window,
    target: TargetOrigin,
    state: watch::Sender<ClientState>,
    started: Mutex<bool>,
}

impl Client {
    pub(crate) fn from_parts(
        window: Window,
        parent: Window,
        target: TargetOrigin,
        registry: HandlerRegistry,
        default_timeout: Option<Duration>,
        span: Span,
    ) -> Self {
        let shared = Arc::new(Shared::new(registry, default_timeout, span));
        let guard = Arc::new(DriverGuard::new(shared.clone(), "client dropped"));
        let (state, _) = watch::channel(ClientState::Connecting);
        Self {
            core: Arc::new(ClientCore {
                shared,
                window,
                parent,
                target,
                state,
                started: Mutex::new(false),
            }),
            guard,
        }
    }

    /// Create the private channel and offer one half to the parent.
    ///
    /// Idempotent: the offer is posted once per client.
    pub fn start(&self) -> Result<()> {
        let core = &self.core;
        let mut started = lock(&core.started);
        if *started {
            return Ok(());
        }

        let (local, remote) = MessageChannel::new().into_ports();
        let receiver = local.start()?;
        let syn = ClientMessage::Syn.encode()?;

        let control = core.clone();
        let listener = core.shared.spawn(run_port::<HostMessage, ClientMessage, _>(
            core.shared.clone(),
            local.clone(),
            receiver,
            move |msg| control.on_control(msg),
        ));
        core.shared.adopt_port(local, listener);

        // Before posting, or a fast acknowledgement would be ignored.
        core.state.send_replace(ClientState::HandshakeSent);
        let reached = core.parent.post_message(
            &core.window,
            syn,
            core.target.post_target(),
            vec![remote],
        );
        *started = true;
        debug!(parent: &core.shared.span, parent_window = %core.parent.id(), reached, "handshake offered");
        Ok(())
    }

    /// Start if needed and wait for the parent's acknowledgement.
    pub async fn connect(&self) -> Result<ClientConnection> {
        self.start()?;
        let mut state = self.core.state.subscribe();
        state
            .wait_for(|state| *state == ClientState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| PeerError::Disconnected("client stopped".to_string()))?;
        Ok(self.new_connection())
    }

    /// The connection, if the handshake has completed.
    pub fn connection(&self) -> Option<ClientConnection> {
        self.is_connected().then(|| self.new_connection())
    }

    pub fn state(&self) -> ClientState {
        *self.core.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Register a handler; effective for the next inbound message.
    pub fn on(&self, event_name: impl Into<String>, handler: Handler) -> HandlerId {
        self.core.shared.registry.on(event_name, handler)
    }

    pub fn off(&self, event_name: &str, id: HandlerId) -> bool {
        self.core.shared.registry.off(event_name, id)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.core.shared.registry
    }

    pub fn window(&self) -> &Window {
        &self.core.window
    }

    pub fn target_origin(&self) -> &TargetOrigin {
        &self.core.target
    }

    fn new_connection(&self) -> ClientConnection {
        Connection::new(self.core.shared.clone(), self.guard.clone())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("window", &self.core.window)
            .field("parent", &self.core.parent)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientCore {
    fn on_control(&self, msg: HostMessage) {
        match msg {
            HostMessage::SynAck => {
                let advanced = self.state.send_if_modified(|state| {
                    if *state == ClientState::HandshakeSent {
                        *state = ClientState::Connected;
                        true
                    } else {
                        false
                    }
                });
                if !advanced {
                    debug!("ignoring repeated handshake acknowledgement");
                    return;
                }
                match self.shared.post(&ClientMessage::Ack) {
                    Ok(()) => info!("client connected"),
                    Err(err) => debug!(error = %err, "handshake confirmation not delivered"),
                }
            }
            HostMessage::Rpc(rpc) => debug!(event = rpc.event_name(), "unexpected rpc on control path"),
        }
    }
}
