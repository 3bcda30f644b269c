//! Connection lifecycle
//!
//! A [`Session`] owns the reconnect loop: it opens a [`Link`] through its
//! [`Connector`], drives one [`Adapter`] per connection, and on any retryable
//! failure resets the mirror, waits out a jittered backoff and tries again.
//! The caller talks to the running loop through a cloneable [`SessionHandle`]
//! and hears about progress on an unbounded [`SessionEvent`] channel.
//!
//! ```text
//! Connecting -> ConnectionOpen -> Connected
//!     ^                               |
//!     +-------- Reconnecting <--------+
//!
//! any state -> Disconnected (stop or fatal server error)
//! ```

use crate::adapter::{Adapter, AdapterEvent};
use crate::backoff::Backoff;
use crate::bandwidth::{BandwidthMeter, BandwidthSample};
use crate::codec;
use crate::config::ClientConfig;
use crate::transport::{Connector, Link};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use slotsync_core::{
    ComponentId, Mirror, MirrorSnapshot, ServerMessage, StableId, StateId, StateUpdate, StateValue,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, watch, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// A connection attempt is in flight
    Connecting,
    /// The transport is open, no checkout yet
    ConnectionOpen,
    /// The initial checkout has been applied
    Connected,
    /// Waiting out the backoff before the next attempt
    Reconnecting,
    /// Terminal
    Disconnected,
}

/// Notifications from a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// The initial checkout of a connection was applied
    Connected { added: Vec<StableId> },
    /// A tick was applied
    Tick {
        removed: Vec<StableId>,
        added: Vec<StableId>,
        state_updates: Vec<StateUpdate>,
        /// Server clock in unix milliseconds
        server_time_ms: i64,
        server_time: Option<DateTime<Utc>>,
    },
    /// The server assigned this client's slot
    UserIndex(u32),
    ServerError {
        error_type: String,
        message: String,
        retryable: bool,
    },
    Warning(String),
    ServerCustom { custom_type: u32, contents: Vec<u8> },
    /// A connection attempt failed or an open connection ended; a retry follows
    ConnectionLost { reason: String },
    /// The session loop has exited
    Disconnected { reason: Option<String> },
}

#[derive(Debug)]
enum Command {
    SetUserComponents {
        components: Vec<(ComponentId, i64)>,
        states: Vec<(StateId, StateValue)>,
    },
    SendCustom {
        custom_type: u32,
        contents: Vec<u8>,
    },
}

/// Latest local payload, replayed on every new connection
#[derive(Debug, Default)]
struct LocalPayload {
    components: IndexMap<ComponentId, i64>,
    states: IndexMap<StateId, StateValue>,
}

impl LocalPayload {
    fn merge(&mut self, components: &[(ComponentId, i64)], states: &[(StateId, StateValue)]) {
        self.components.extend(components.iter().copied());
        self.states.extend(states.iter().cloned());
    }

    fn components(&self) -> Vec<(ComponentId, i64)> {
        self.components.iter().map(|(&id, &value)| (id, value)).collect()
    }

    fn states(&self) -> Vec<(StateId, StateValue)> {
        self.states
            .iter()
            .map(|(&id, value)| (id, value.clone()))
            .collect()
    }
}

/// Why a connection ended without an error
enum Exit {
    Stopped,
    Closed,
}

/// Caller side of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    user_index: watch::Receiver<Option<u32>>,
    meter: Arc<Mutex<BandwidthMeter>>,
    mirror: Arc<RwLock<Mirror>>,
}

impl SessionHandle {
    /// Submit this client's components and states
    ///
    /// The latest value of each is remembered and replayed after a reconnect.
    pub fn set_user_components(
        &self,
        components: Vec<(ComponentId, i64)>,
        states: Vec<(StateId, StateValue)>,
    ) -> Result<()> {
        self.commands
            .send(Command::SetUserComponents { components, states })
            .map_err(|_| Error::Closed)
    }

    /// Send an opaque custom record to the server
    pub fn send_custom_message(&self, custom_type: u32, contents: Vec<u8>) -> Result<()> {
        self.commands
            .send(Command::SendCustom {
                custom_type,
                contents,
            })
            .map_err(|_| Error::Closed)
    }

    /// Tear down the connection and any pending reconnect
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// This client's slot on the current connection
    pub fn user_index(&self) -> Option<u32> {
        *self.user_index.borrow()
    }

    /// Bytes received during the last second
    pub fn bandwidth(&self) -> BandwidthSample {
        self.meter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample(Instant::now())
    }

    /// Read access to the mirror
    pub async fn mirror(&self) -> RwLockReadGuard<'_, Mirror> {
        self.mirror.read().await
    }

    /// Serializable copy of the mirror
    pub async fn snapshot(&self) -> MirrorSnapshot {
        self.mirror.read().await.snapshot()
    }
}

/// Reconnecting client session
pub struct Session<C: Connector> {
    config: ClientConfig,
    connector: C,
    mirror: Arc<RwLock<Mirror>>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    user_index: watch::Sender<Option<u32>>,
    meter: Arc<Mutex<BandwidthMeter>>,
    backoff: Backoff,
    local: Option<LocalPayload>,
}

impl<C: Connector> Session<C> {
    /// Create a session that has not started connecting yet
    ///
    /// Nothing happens until [`Session::run`] is polled.
    pub fn new(
        config: ClientConfig,
        connector: C,
    ) -> Result<(Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (index_tx, index_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let meter = Arc::new(Mutex::new(BandwidthMeter::default()));
        let mirror = Arc::new(RwLock::new(Mirror::new()));

        let handle = SessionHandle {
            commands: command_tx,
            cancel: cancel.clone(),
            state: state_rx,
            user_index: index_rx,
            meter: Arc::clone(&meter),
            mirror: Arc::clone(&mirror),
        };

        let session = Self {
            backoff: Backoff::new(config.backoff),
            config,
            connector,
            mirror,
            commands: command_rx,
            events: event_tx,
            cancel,
            state: state_tx,
            user_index: index_tx,
            meter,
            local: None,
        };

        Ok((session, handle, event_rx))
    }

    /// Run until stopped or a non-retryable server error
    pub async fn run(mut self) -> Result<()> {
        info!(url = %self.config.url, observer = self.config.observer, "session starting");
        let result = self.run_loop().await;

        self.set_state(SessionState::Disconnected);
        let reason = result.as_ref().err().map(ToString::to_string);
        match &reason {
            Some(reason) => error!(%reason, "session terminated"),
            None => info!("session stopped"),
        }
        self.emit(SessionEvent::Disconnected { reason });
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        let mut attempt: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            attempt += 1;
            self.set_state(SessionState::Connecting);

            let outcome = match self.open().await {
                Ok(Some(link)) => self.drive(link, attempt).await,
                Ok(None) => return Ok(()),
                Err(err) => Err(err),
            };

            let reason = match outcome {
                Ok(Exit::Stopped) => return Ok(()),
                Ok(Exit::Closed) => {
                    info!(attempt, "connection closed by server");
                    Error::Closed.to_string()
                }
                Err(err @ (Error::Protocol(_) | Error::Codec(_))) => {
                    error!(attempt, error = %err, "server payload rejected, dropping connection");
                    err.to_string()
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempt, error = %err, "connection lost");
                    err.to_string()
                }
                Err(err) => return Err(err),
            };
            self.emit(SessionEvent::ConnectionLost { reason });

            self.mirror.write().await.reset();
            self.user_index.send_replace(None);
            self.set_state(SessionState::Reconnecting);

            let delay = self.backoff.next_delay();
            debug!(
                attempt,
                retries = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "waiting before reconnect"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One timeout-bounded connection attempt; `None` if stopped meanwhile
    async fn open(&self) -> Result<Option<C::Link>> {
        let timeout = self.config.connect_timeout();
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            result = tokio::time::timeout(timeout, self.connector.connect(&self.config.url)) => {
                match result {
                    Ok(link) => link.map(Some),
                    Err(_) => Err(Error::ConnectTimeout(timeout)),
                }
            }
        }
    }

    async fn drive(&mut self, mut link: C::Link, attempt: u64) -> Result<Exit> {
        self.set_state(SessionState::ConnectionOpen);
        debug!(attempt, "transport open");

        let mut adapter = Adapter::new(&self.config);
        if let Some(local) = &self.local {
            adapter.set_user_components(&local.components(), &local.states());
        }

        let result = self.pump(&mut link, &mut adapter).await;
        link.close().await;
        result
    }

    async fn pump(&mut self, link: &mut C::Link, adapter: &mut Adapter) -> Result<Exit> {
        let cancel = self.cancel.clone();
        let mut connected = false;
        flush(link, adapter).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Exit::Stopped),
                Some(command) = self.commands.recv() => self.apply_command(command, adapter),
                frame = link.recv() => match frame {
                    Some(frame) => self.receive(&frame?, adapter, &mut connected).await?,
                    None => return Ok(Exit::Closed),
                },
            }
            flush(link, adapter).await?;
        }
    }

    fn apply_command(&mut self, command: Command, adapter: &mut Adapter) {
        match command {
            Command::SetUserComponents { components, states } => {
                self.local
                    .get_or_insert_with(LocalPayload::default)
                    .merge(&components, &states);
                adapter.set_user_components(&components, &states);
            }
            Command::SendCustom {
                custom_type,
                contents,
            } => adapter.send_custom_message(custom_type, contents),
        }
    }

    async fn receive(
        &mut self,
        frame: &[u8],
        adapter: &mut Adapter,
        connected: &mut bool,
    ) -> Result<()> {
        let message: ServerMessage = codec::decode(frame)?;
        trace!(kind = message.kind(), bytes = frame.len(), "frame received");
        self.meter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(Instant::now(), codec::footprint(&message, frame.len()));

        let event = {
            let mut mirror = self.mirror.write().await;
            adapter.handle(message, &mut mirror)?
        };

        match event {
            Some(AdapterEvent::Connected(outcome)) => {
                if !*connected {
                    *connected = true;
                    self.backoff.reset();
                    self.set_state(SessionState::Connected);
                }
                info!(participants = outcome.added.len(), "initial checkout received");
                self.emit(SessionEvent::Connected {
                    added: outcome.added,
                });
            }
            Some(AdapterEvent::Tick {
                outcome,
                server_time,
            }) => {
                self.emit(SessionEvent::Tick {
                    removed: outcome.removed,
                    added: outcome.added,
                    state_updates: outcome.state_updates,
                    server_time_ms: server_time,
                    server_time: DateTime::<Utc>::from_timestamp_millis(server_time),
                });
            }
            Some(AdapterEvent::UserIndex(index)) => {
                info!(index, "user index assigned");
                self.user_index.send_replace(Some(index));
                self.emit(SessionEvent::UserIndex(index));
            }
            Some(AdapterEvent::ServerError {
                error_type,
                message,
                retryable,
            }) => {
                self.emit(SessionEvent::ServerError {
                    error_type: error_type.clone(),
                    message: message.clone(),
                    retryable,
                });
                return Err(Error::Server {
                    error_type,
                    message,
                    retryable,
                });
            }
            Some(AdapterEvent::Warning(message)) => {
                warn!(%message, "server warning");
                self.emit(SessionEvent::Warning(message));
            }
            Some(AdapterEvent::ServerCustom {
                custom_type,
                contents,
            }) => self.emit(SessionEvent::ServerCustom {
                custom_type,
                contents,
            }),
            None => {}
        }
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "session state changed");
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // the caller may have dropped the receiver
        let _ = self.events.send(event);
    }
}

async fn flush<L: Link>(link: &mut L, adapter: &mut Adapter) -> Result<()> {
    for message in adapter.take_outbox() {
        link.send(codec::encode(&message)?).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotsync_core::{
        ClientMessage, ComponentDeltaDeltas, ComponentSnapshot, InitialCheckout, Tick,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const POS: ComponentId = ComponentId(1);
    const HAT: StateId = StateId(1);

    enum Script {
        Refuse,
        Hang,
        Open(MockLink),
    }

    #[derive(Clone, Default)]
    struct MockConnector {
        script: Arc<Mutex<VecDeque<Script>>>,
        attempts: Arc<AtomicUsize>,
    }

    impl MockConnector {
        fn push(&self, step: Script) {
            self.script.lock().unwrap().push_back(step);
        }

        /// Script an open link and return the server end
        fn open(&self) -> Peer {
            let (to_client, inbound) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            self.push(Script::Open(MockLink { inbound, outbound }));
            Peer {
                to_client,
                from_client,
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Connector for MockConnector {
        type Link = MockLink;

        async fn connect(&self, _url: &str) -> Result<MockLink> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Script::Open(link)) => Ok(link),
                Some(Script::Refuse) => Err(Error::Transport("connection refused".into())),
                Some(Script::Hang) | None => std::future::pending().await,
            }
        }
    }

    struct MockLink {
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    }

    impl Link for MockLink {
        async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
            self.outbound.send(frame).map_err(|_| Error::Closed)
        }

        async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.inbound.close();
        }
    }

    struct Peer {
        to_client: mpsc::UnboundedSender<Vec<u8>>,
        from_client: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    impl Peer {
        fn push(&self, message: ServerMessage) {
            self.to_client.send(codec::encode(&message).unwrap()).unwrap();
        }

        async fn next(&mut self) -> ClientMessage {
            let frame = tokio::time::timeout(Duration::from_secs(60), self.from_client.recv())
                .await
                .expect("no frame from client")
                .expect("client link dropped");
            codec::decode(&frame).unwrap()
        }
    }

    fn config(observer: bool) -> ClientConfig {
        let mut config = ClientConfig::new("ws://localhost:9000/sync", "token");
        config.observer = observer;
        config.connect_timeout_ms = 1_000;
        config.backoff.initial_ms = 100;
        config.backoff.max_ms = 1_000;
        config
    }

    fn start(
        config: ClientConfig,
        connector: &MockConnector,
    ) -> (
        JoinHandle<Result<()>>,
        SessionHandle,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (session, handle, events) = Session::new(config, connector.clone()).unwrap();
        (tokio::spawn(session.run()), handle, events)
    }

    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        mut matches: impl FnMut(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    }

    fn checkout(values: Vec<i64>) -> ServerMessage {
        let deltas = vec![0; values.len()];
        ServerMessage::InitialCheckout(InitialCheckout {
            indices_count: values.len() as u32,
            components: vec![ComponentSnapshot {
                component_id: POS,
                values,
                deltas,
            }],
            states: vec![],
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_checkout_and_tick() {
        let connector = MockConnector::default();
        let mut peer = connector.open();
        let (task, handle, mut events) = start(config(false), &connector);

        handle
            .set_user_components(vec![(POS, 5)], vec![(HAT, Some(b"red".to_vec()))])
            .unwrap();
        assert_eq!(
            peer.next().await,
            ClientMessage::ConnectUser {
                token: "token".into(),
                observer: false,
                components: vec![(POS, 5)],
                states: vec![(HAT, Some(b"red".to_vec()))],
            }
        );

        peer.push(checkout(vec![100, 200]));
        wait_for(&mut events, |e| {
            *e == SessionEvent::StateChanged(SessionState::Connected)
        })
        .await;
        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
        assert_eq!(
            event,
            SessionEvent::Connected {
                added: vec![StableId(1), StableId(2)],
            }
        );
        assert_eq!(handle.state(), SessionState::Connected);
        assert!(handle.bandwidth().total > 0);

        peer.push(ServerMessage::Tick(Tick {
            indices_count: 2,
            component_delta_deltas: vec![ComponentDeltaDeltas {
                component_id: POS,
                delta_deltas: vec![1, -1],
            }],
            server_time: 1_700_000_000_000,
            ..Default::default()
        }));
        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Tick { .. })).await;
        match event {
            SessionEvent::Tick {
                server_time_ms,
                server_time,
                ..
            } => {
                assert_eq!(server_time_ms, 1_700_000_000_000);
                assert_eq!(server_time.unwrap().timestamp_millis(), 1_700_000_000_000);
            }
            other => panic!("unexpected event {other:?}"),
        }
        {
            let mirror = handle.mirror().await;
            assert_eq!(mirror.component(StableId(1), POS), Some(101));
            assert_eq!(mirror.component(StableId(2), POS), Some(199));
        }

        handle.stop();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(handle.state(), SessionState::Disconnected);
        wait_for(&mut events, |e| {
            *e == SessionEvent::Disconnected { reason: None }
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_states_flush_when_user_index_arrives() {
        let connector = MockConnector::default();
        let mut peer = connector.open();
        let (task, handle, mut events) = start(config(false), &connector);

        handle.set_user_components(vec![(POS, 1)], vec![]).unwrap();
        assert!(matches!(peer.next().await, ClientMessage::ConnectUser { .. }));

        // the component goes out at once, the state is held back
        handle
            .set_user_components(vec![(POS, 2)], vec![(HAT, Some(vec![7]))])
            .unwrap();
        assert_eq!(
            peer.next().await,
            ClientMessage::SetUserComponents {
                components: vec![(POS, 2)],
                states: vec![],
            }
        );

        peer.push(ServerMessage::UserIndex { index: 2 });
        assert_eq!(
            peer.next().await,
            ClientMessage::SetUserComponents {
                components: vec![],
                states: vec![(HAT, Some(vec![7]))],
            }
        );
        wait_for(&mut events, |e| *e == SessionEvent::UserIndex(2)).await;
        assert_eq!(handle.user_index(), Some(2));
        assert!(peer.from_client.try_recv().is_err());

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_and_custom_messages() {
        let connector = MockConnector::default();
        let mut peer = connector.open();
        let (task, handle, mut events) = start(config(true), &connector);

        assert!(matches!(
            peer.next().await,
            ClientMessage::ConnectUser { observer: true, .. }
        ));

        peer.push(ServerMessage::Ping { nonce: 42 });
        assert_eq!(peer.next().await, ClientMessage::Pong { nonce: 42 });

        handle.send_custom_message(3, vec![9, 9]).unwrap();
        assert_eq!(
            peer.next().await,
            ClientMessage::ClientCustom {
                custom_type: 3,
                contents: vec![9, 9],
            }
        );

        peer.push(ServerMessage::ServerCustom {
            custom_type: 5,
            contents: vec![1],
        });
        wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ServerCustom { custom_type: 5, .. })
        })
        .await;

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resets_mirror_and_replays_payload() {
        let connector = MockConnector::default();
        let mut first = connector.open();
        let mut second = connector.open();
        let (task, handle, mut events) = start(config(false), &connector);

        handle
            .set_user_components(vec![(POS, 5)], vec![(HAT, Some(vec![1]))])
            .unwrap();
        assert!(matches!(first.next().await, ClientMessage::ConnectUser { .. }));
        handle.set_user_components(vec![(POS, 6)], vec![]).unwrap();
        assert!(matches!(
            first.next().await,
            ClientMessage::SetUserComponents { .. }
        ));
        first.push(checkout(vec![10, 20, 30]));
        wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;

        drop(first.to_client);
        wait_for(&mut events, |e| {
            *e == SessionEvent::StateChanged(SessionState::Reconnecting)
        })
        .await;

        // the new connection announces the remembered payload by itself
        assert_eq!(
            second.next().await,
            ClientMessage::ConnectUser {
                token: "token".into(),
                observer: false,
                components: vec![(POS, 6)],
                states: vec![(HAT, Some(vec![1]))],
            }
        );
        assert!(!handle.mirror().await.is_checked_out());

        second.push(checkout(vec![99]));
        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
        assert_eq!(
            event,
            SessionEvent::Connected {
                added: vec![StableId(1)],
            }
        );
        assert_eq!(handle.mirror().await.component(StableId(1), POS), Some(99));
        assert_eq!(connector.attempts(), 2);

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_violation_reconnects() {
        let connector = MockConnector::default();
        let mut first = connector.open();
        let mut second = connector.open();
        let (task, handle, mut events) = start(config(true), &connector);

        assert!(matches!(first.next().await, ClientMessage::ConnectUser { .. }));
        first.push(checkout(vec![1, 2]));
        first.push(ServerMessage::Tick(Tick {
            indices_count: 2,
            component_delta_deltas: vec![ComponentDeltaDeltas {
                component_id: POS,
                delta_deltas: vec![1, 2, 3],
            }],
            ..Default::default()
        }));

        let event = wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ConnectionLost { .. })
        })
        .await;
        match event {
            SessionEvent::ConnectionLost { reason } => {
                assert!(reason.contains("delta_deltas"), "{reason}")
            }
            other => panic!("unexpected event {other:?}"),
        }
        wait_for(&mut events, |e| {
            *e == SessionEvent::StateChanged(SessionState::Reconnecting)
        })
        .await;
        assert!(matches!(second.next().await, ClientMessage::ConnectUser { .. }));

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_server_error_reconnects() {
        let connector = MockConnector::default();
        let mut first = connector.open();
        let mut second = connector.open();
        let (task, handle, mut events) = start(config(true), &connector);

        assert!(matches!(first.next().await, ClientMessage::ConnectUser { .. }));
        first.push(ServerMessage::Error {
            error_type: "overloaded".into(),
            message: "try later".into(),
            retryable: true,
        });

        wait_for(&mut events, |e| {
            matches!(e, SessionEvent::ServerError { retryable: true, .. })
        })
        .await;
        assert!(matches!(second.next().await, ClientMessage::ConnectUser { .. }));
        assert_eq!(connector.attempts(), 2);

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_server_error_disconnects() {
        let connector = MockConnector::default();
        let mut peer = connector.open();
        let (task, handle, mut events) = start(config(true), &connector);

        assert!(matches!(peer.next().await, ClientMessage::ConnectUser { .. }));
        peer.push(ServerMessage::Error {
            error_type: "auth".into(),
            message: "bad token".into(),
            retryable: false,
        });

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Server { retryable: false, .. }));
        assert_eq!(handle.state(), SessionState::Disconnected);
        assert_eq!(connector.attempts(), 1);

        wait_for(&mut events, |e| {
            matches!(e, SessionEvent::Disconnected { reason: Some(_) })
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_and_refusal_are_retried() {
        let connector = MockConnector::default();
        connector.push(Script::Hang);
        connector.push(Script::Refuse);
        let mut peer = connector.open();
        let (task, handle, _events) = start(config(true), &connector);

        assert!(matches!(peer.next().await, ClientMessage::ConnectUser { .. }));
        assert_eq!(connector.attempts(), 3);
        assert_eq!(handle.state(), SessionState::ConnectionOpen);

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_restarts_after_connected() {
        let connector = MockConnector::default();
        for _ in 0..3 {
            connector.push(Script::Refuse);
        }
        let mut first = connector.open();
        let mut second = connector.open();
        let (task, handle, mut events) = start(config(true), &connector);

        assert!(matches!(first.next().await, ClientMessage::ConnectUser { .. }));
        first.push(checkout(vec![1]));
        wait_for(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;

        let closed_at = tokio::time::Instant::now();
        drop(first.to_client);
        assert!(matches!(second.next().await, ClientMessage::ConnectUser { .. }));

        // three refusals grew the delay past 300ms; a checkout starts it over
        let waited = closed_at.elapsed();
        assert!(waited >= Duration::from_millis(100), "{waited:?}");
        assert!(waited < Duration::from_millis(150), "{waited:?}");
        assert_eq!(connector.attempts(), 5);

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_before_checkout_still_waits() {
        let connector = MockConnector::default();
        let mut first = connector.open();
        connector.push(Script::Hang);
        let (task, handle, mut events) = start(config(true), &connector);

        assert!(matches!(first.next().await, ClientMessage::ConnectUser { .. }));
        let closed_at = tokio::time::Instant::now();
        drop(first.to_client);

        wait_for(&mut events, |e| {
            *e == SessionEvent::ConnectionLost {
                reason: Error::Closed.to_string(),
            }
        })
        .await;
        wait_for(&mut events, |e| {
            *e == SessionEvent::StateChanged(SessionState::Reconnecting)
        })
        .await;
        wait_for(&mut events, |e| {
            *e == SessionEvent::StateChanged(SessionState::Connecting)
        })
        .await;
        assert!(closed_at.elapsed() >= Duration::from_millis(100));

        // the second attempt never resolves; stop abandons it
        handle.stop();
        task.await.unwrap().unwrap();
        assert_eq!(handle.state(), SessionState::Disconnected);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff() {
        let connector = MockConnector::default();
        connector.push(Script::Refuse);
        let (task, handle, mut events) = start(config(true), &connector);

        wait_for(&mut events, |e| {
            *e == SessionEvent::StateChanged(SessionState::Reconnecting)
        })
        .await;
        handle.stop();

        task.await.unwrap().unwrap();
        assert!(handle.is_stopped());
        assert_eq!(handle.state(), SessionState::Disconnected);
        assert!(handle.set_user_components(vec![], vec![]).is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ClientConfig::new("http://localhost", "token");
        assert!(Session::new(config, MockConnector::default()).is_err());
    }
}
