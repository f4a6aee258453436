use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portlink_transport::{EmbeddedFrame, Window, WindowEvents, WindowMessage};
use portlink_wire::{ClientMessage, Envelope, HostMessage, MAX_HANDSHAKE_ENVELOPE};
use tokio::sync::watch;
use tracing::{debug, info, warn, Span};

use crate::connection::{Connection, HostConnection};
use crate::dispatcher::run_port;
use crate::driver::{DriverGuard, Shared};
use crate::error::{PeerError, Result};
use crate::handshake::HostState;
use crate::lock;
use crate::origin::{validate, TargetOrigin};
use crate::registry::{Handler, HandlerId, HandlerRegistry};

/// The embedding side of a connection.
///
/// Built with [`HostBuilder`](crate::HostBuilder). Clones share one peer;
/// the peer shuts down once every clone and every connection handle is gone.
#[derive(Clone)]
pub struct Host {
    core: Arc<HostCore>,
    guard: Arc<DriverGuard<HostMessage>>,
}

struct HostCore {
    shared: Arc<Shared<HostMessage>>,
    window: Window,
    frame: Arc<dyn EmbeddedFrame>,
    target: TargetOrigin,
    state: watch::Sender<HostState>,
    started: Mutex<bool>,
}

impl Host {
    pub(crate) fn from_parts(
        window: Window,
        frame: Arc<dyn EmbeddedFrame>,
        target: TargetOrigin,
        registry: HandlerRegistry,
        default_timeout: Option<Duration>,
        span: Span,
    ) -> Self {
        let shared = Arc::new(Shared::new(registry, default_timeout, span));
        let guard = Arc::new(DriverGuard::new(shared.clone(), "host dropped"));
        let (state, _) = watch::channel(HostState::Connecting);
        Self {
            core: Arc::new(HostCore {
                shared,
                window,
                frame,
                target,
                state,
                started: Mutex::new(false),
            }),
            guard,
        }
    }

    /// Listen for handshake initiations and attach the frame.
    ///
    /// Idempotent: only the first successful call attaches. If attaching
    /// fails nothing is left running and a later call tries again.
    pub fn start(&self) -> Result<()> {
        let core = &self.core;
        let mut started = lock(&core.started);
        if *started {
            return Ok(());
        }

        // Listen first so a child that loads instantly is not missed.
        let events = core.window.listen();
        core.frame.attach()?;

        let task = core.shared.spawn(core.clone().listen(events));
        core.shared.track(task);
        *started = true;
        debug!(parent: &core.shared.span, window = %core.window.id(), target_origin = %core.target, "host listening for handshake");
        Ok(())
    }

    /// Start if needed and wait until the client has confirmed the
    /// handshake.
    pub async fn connect(&self) -> Result<HostConnection> {
        self.start()?;
        let mut state = self.core.state.subscribe();
        state
            .wait_for(|state| *state == HostState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| PeerError::Disconnected("host stopped".to_string()))?;
        Ok(self.new_connection())
    }

    /// The connection, if the handshake has completed.
    pub fn connection(&self) -> Option<HostConnection> {
        self.is_connected().then(|| self.new_connection())
    }

    pub fn state(&self) -> HostState {
        *self.core.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == HostState::Connected
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

    fn new_connection(&self) -> HostConnection {
        Connection::new(self.core.shared.clone(), self.guard.clone())
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("window", &self.core.window)
            .field("target_origin", &self.core.target)
            .field("state", &self.state())
            .finish()
    }
}

impl HostCore {
    async fn listen(self: Arc<Self>, mut events: WindowEvents) {
        while let Some(msg) = events.recv().await {
            if let Err(rejection) = validate(self.frame.as_ref(), &self.target, &msg) {
                debug!(source = %msg.source, origin = %msg.origin, %rejection, "window message rejected");
                continue;
            }
            match ClientMessage::decode_with_limit(&msg.data, MAX_HANDSHAKE_ENVELOPE) {
                Ok(ClientMessage::Syn) => self.handle_syn(msg),
                Ok(other) => {
                    debug!(action = other.action_name(), "ignoring non-handshake window message")
                }
                Err(err) => debug!(error = %err, "dropping undecodable window message"),
            }
        }
    }

    fn handle_syn(self: &Arc<Self>, msg: WindowMessage) {
        let WindowMessage { origin, ports, .. } = msg;
        let Some(port) = ports.into_iter().next() else {
            warn!(%origin, "handshake initiation without a port");
            return;
        };

        // A re-handshake reaching this point already passed the guard, which
        // admits exactly the origins the reconnection policy accepts.
        let rehandshake = self.shared.has_port();

        let receiver = match port.start() {
            Ok(receiver) => receiver,
            Err(err) => {
                warn!(error = %err, "cannot listen on offered port");
                return;
            }
        };

        let core = self.clone();
        let listener = self.shared.spawn(run_port::<ClientMessage, HostMessage, _>(
            self.shared.clone(),
            port.clone(),
            receiver,
            move |msg| core.on_control(msg),
        ));
        self.shared.adopt_port(port, listener);
        self.state.send_replace(HostState::HandshakeAcked);

        match self.shared.post(&HostMessage::SynAck) {
            Ok(()) => debug!(%origin, rehandshake, "handshake acknowledged"),
            Err(err) => warn!(error = %err, "handshake acknowledgement not delivered"),
        }
    }

    fn on_control(&self, msg: ClientMessage) {
        match msg {
            ClientMessage::Ack => {
                let advanced = self.state.send_if_modified(|state| {
                    if *state == HostState::HandshakeAcked {
                        *state = HostState::Connected;
                        true
                    } else {
                        false
                    }
                });
                if advanced {
                    info!("host connected");
                } else {
                    debug!("ignoring unexpected handshake confirmation");
                }
            }
            other => debug!(
                action = other.action_name(),
                "ignoring handshake envelope on private port"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use portlink_transport::{InlineFrame, MessageChannel, MessagePort, PortReceiver, TransportError};
    use portlink_wire::Rpc;
    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::builder::HostBuilder;

    /// Plays the client side of the handshake by hand.
    struct Scripted {
        port: MessagePort,
        inbound: PortReceiver,
    }

    impl Scripted {
        fn offer(host: &Window, child: &Window) -> Self {
            let (port, remote) = MessageChannel::new().into_ports();
            let inbound = port.start().unwrap();
            host.post_message(child, ClientMessage::Syn.encode().unwrap(), "*", vec![remote]);
            Self { port, inbound }
        }

        async fn next(&mut self) -> Option<HostMessage> {
            let data = timeout(Duration::from_secs(1), self.inbound.recv())
                .await
                .expect("host should answer in time")?;
            Some(HostMessage::decode(&data).unwrap())
        }

        async fn is_silent(&mut self) -> bool {
            timeout(Duration::from_millis(50), self.inbound.recv())
                .await
                .is_err()
        }

        fn ack(&self) {
            self.port
                .post_message(ClientMessage::Ack.encode().unwrap())
                .unwrap();
        }
    }

    fn host_with(target: Option<&str>) -> (Host, Arc<InlineFrame>, Window, Window) {
        let host_window = Window::new("https://host.example");
        let child = Window::new("https://a.example");
        let frame = Arc::new(InlineFrame::with_content(&child));
        let mut builder = HostBuilder::new(host_window.clone(), frame.clone());
        if let Some(target) = target {
            builder = builder.with_target_origin(target);
        }
        (builder.build(), frame, host_window, child)
    }

    #[tokio::test]
    async fn handshake_reaches_connected() {
        let (host, _frame, host_window, child) = host_with(None);
        host.start().unwrap();
        assert_eq!(host.state(), HostState::Connecting);
        assert!(host.connection().is_none());

        let mut client = Scripted::offer(&host_window, &child);
        assert_eq!(client.next().await, Some(HostMessage::SynAck));
        assert_eq!(host.state(), HostState::HandshakeAcked);

        client.ack();
        let conn = host.connect().await.unwrap();
        assert!(host.is_connected());
        assert!(host.connection().is_some());

        conn.send("hello", vec![json!("world")]).unwrap();
        assert_eq!(
            client.next().await,
            Some(HostMessage::Rpc(Rpc::Event {
                event_name: "hello".into(),
                payload: vec![json!("world")],
            }))
        );
    }

    #[tokio::test]
    async fn connect_twice_attaches_once() {
        let (host, frame, host_window, child) = host_with(None);
        let first = tokio::spawn({
            let host = host.clone();
            async move { host.connect().await }
        });
        host.start().unwrap();
        let second = tokio::spawn({
            let host = host.clone();
            async move { host.connect().await }
        });

        let mut client = Scripted::offer(&host_window, &child);
        assert_eq!(client.next().await, Some(HostMessage::SynAck));
        client.ack();

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(frame.attach_count(), 1);
        assert_eq!(host_window.listener_count(), 1);
    }

    #[tokio::test]
    async fn ignores_syn_from_other_context() {
        let (host, _frame, host_window, _child) = host_with(None);
        host.start().unwrap();

        let intruder = Window::new("https://a.example");
        let mut client = Scripted::offer(&host_window, &intruder);
        assert!(client.is_silent().await);
        assert_eq!(host.state(), HostState::Connecting);
    }

    #[tokio::test]
    async fn ignores_syn_from_wrong_origin() {
        let (host, _frame, host_window, child) = host_with(Some("https://other.example"));
        host.start().unwrap();

        let mut client = Scripted::offer(&host_window, &child);
        assert!(client.is_silent().await);
        assert_eq!(host.state(), HostState::Connecting);
    }

    #[tokio::test]
    async fn origin_guard_refuses_foreign_rehandshake() {
        let (host, frame, host_window, child) = host_with(Some("https://a.example"));
        host.start().unwrap();

        let mut first = Scripted::offer(&host_window, &child);
        assert_eq!(first.next().await, Some(HostMessage::SynAck));
        first.ack();
        let conn = host.connect().await.unwrap();
        let port = conn.port_id();

        let navigated = Window::new("https://b.example");
        frame.load(&navigated);
        let mut second = Scripted::offer(&host_window, &navigated);
        assert!(second.is_silent().await);

        assert_eq!(conn.port_id(), port);
        assert!(host.is_connected());
        conn.send("still-here", vec![]).unwrap();
        assert!(matches!(first.next().await, Some(HostMessage::Rpc(_))));
    }

    #[tokio::test]
    async fn restricted_host_adopts_rehandshake_from_its_origin() {
        let (host, frame, host_window, child) = host_with(Some("https://a.example"));
        host.start().unwrap();

        let mut first = Scripted::offer(&host_window, &child);
        assert_eq!(first.next().await, Some(HostMessage::SynAck));
        first.ack();
        let conn = host.connect().await.unwrap();
        let old_port = conn.port_id();

        let reloaded = Window::new("https://a.example");
        frame.load(&reloaded);
        let mut second = Scripted::offer(&host_window, &reloaded);
        assert_eq!(second.next().await, Some(HostMessage::SynAck));
        assert_ne!(conn.port_id(), old_port);
        assert_eq!(first.next().await, None);
    }

    #[tokio::test]
    async fn unrestricted_host_adopts_new_port() {
        let (host, frame, host_window, child) = host_with(None);
        host.start().unwrap();

        let mut first = Scripted::offer(&host_window, &child);
        assert_eq!(first.next().await, Some(HostMessage::SynAck));
        first.ack();
        let conn = host.connect().await.unwrap();
        let old_port = conn.port_id();

        let reloaded = Window::new("https://b.example");
        frame.load(&reloaded);
        let mut second = Scripted::offer(&host_window, &reloaded);
        assert_eq!(second.next().await, Some(HostMessage::SynAck));
        assert_eq!(host.state(), HostState::HandshakeAcked);
        assert_ne!(conn.port_id(), old_port);

        // The old endpoint is closed.
        assert_eq!(first.next().await, None);

        second.ack();
        host.connect().await.unwrap();
        conn.send("fresh", vec![]).unwrap();
        assert!(matches!(second.next().await, Some(HostMessage::Rpc(_))));
    }

    #[tokio::test]
    async fn attach_failure_leaves_host_unstarted() {
        let host_window = Window::new("https://host.example");
        let child = Window::new("https://a.example");
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let frame = Arc::new(InlineFrame::with_content(&child).on_attach({
            let fail = fail.clone();
            move || {
                if fail.load(std::sync::atomic::Ordering::SeqCst) {
                    Err(TransportError::Attach("container missing".into()))
                } else {
                    Ok(())
                }
            }
        }));
        let host = HostBuilder::new(host_window.clone(), frame.clone()).build();

        assert!(matches!(
            host.connect().await,
            Err(PeerError::Transport(TransportError::Attach(_)))
        ));
        assert_eq!(host_window.listener_count(), 0);

        fail.store(false, std::sync::atomic::Ordering::SeqCst);
        host.start().unwrap();
        assert_eq!(frame.attach_count(), 2);
        assert_eq!(host_window.listener_count(), 1);
    }

    #[tokio::test]
    async fn answers_requests_from_client() {
        let (host, _frame, host_window, child) = host_with(None);
        host.on(
            "whoami",
            Handler::sync(|ctx, _| Ok(json!({ "event": ctx.event_name, "seq": ctx.sequence }))),
        );
        host.start().unwrap();

        let mut client = Scripted::offer(&host_window, &child);
        assert_eq!(client.next().await, Some(HostMessage::SynAck));
        client.ack();
        let request = ClientMessage::Rpc(Rpc::Request {
            event_name: "whoami".into(),
            payload: vec![],
            sequence: 4,
            signal: false,
        });
        client.port.post_message(request.encode().unwrap()).unwrap();

        assert_eq!(
            client.next().await,
            Some(HostMessage::Rpc(Rpc::Response {
                event_name: "whoami".into(),
                payload: vec![json!({ "event": "whoami", "seq": 4 })],
                sequence: 4,
            }))
        );
    }

    #[tokio::test]
    async fn dropping_host_stops_listening() {
        let (host, _frame, host_window, child) = host_with(None);
        host.start().unwrap();
        let mut client = Scripted::offer(&host_window, &child);
        assert_eq!(client.next().await, Some(HostMessage::SynAck));

        drop(host);
        assert_eq!(client.next().await, None);
    }
}
