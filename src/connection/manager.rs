//! Connection lifecycle actor.
//!
//! A single task per session owns the physical link, the handshake and the
//! reconnect timer. Every state change goes through [`ConnectionManager::apply`],
//! which serialises transitions and discards the ones issued by a task that
//! has been superseded (after `disconnect()` or a new `connect()`).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::auth::{AuthFallbackResolver, Resolution};
use crate::config::ConnectionConfig;
use crate::envelope::{Command, Envelope, Payload, WireEnvelope};
use crate::error::{ClientError, Result};
use crate::metrics::{ConnectionMetrics, EnvelopeMetrics};
use crate::reconnect::ReconnectionScheduler;

use super::state::{ConnectionState, SessionMode, StateChange};
use super::transport::{Connector, TransportLink};

/// Callback invoked on every transition
pub type StateObserver = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Receives every decoded inbound envelope
pub trait EnvelopeHandler: Send + Sync {
    fn handle(&self, envelope: Envelope);
}

struct Machine {
    state: ConnectionState,
    /// Bumped by connect()/disconnect(); a task only acts while its epoch is current
    epoch: u64,
    attempt: u32,
    mode: Option<SessionMode>,
    last_error: Option<ClientError>,
    outbound: Option<mpsc::Sender<String>>,
    link_fault: Option<Arc<Notify>>,
    task: Option<JoinHandle<()>>,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    resolver: Arc<AuthFallbackResolver>,
    scheduler: ReconnectionScheduler,
    machine: Mutex<Machine>,
    transition_gate: ReentrantMutex<()>,
    observers: RwLock<Vec<(u64, StateObserver)>>,
    next_observer_id: AtomicU64,
    state_tx: watch::Sender<StateChange>,
    handler: RwLock<Option<Weak<dyn EnvelopeHandler>>>,
    me: Weak<ConnectionManager>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        resolver: Arc<AuthFallbackResolver>,
        scheduler: ReconnectionScheduler,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(StateChange::initial());
        Arc::new_cyclic(|me| Self {
            config,
            connector,
            resolver,
            scheduler,
            machine: Mutex::new(Machine {
                state: ConnectionState::Idle,
                epoch: 0,
                attempt: 0,
                mode: None,
                last_error: None,
                outbound: None,
                link_fault: None,
                task: None,
            }),
            transition_gate: ReentrantMutex::new(()),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            state_tx,
            handler: RwLock::new(None),
            me: me.clone(),
        })
    }

    /// Start a session. No-op while Connecting, Connected or Reconnecting.
    pub fn connect(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            ClientError::Config("connect() must be called inside a Tokio runtime".to_string())
        })?;
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };

        let mut epoch = 0;
        let started = self.apply(
            |m| !m.state.is_active(),
            ConnectionState::Connecting,
            |m| {
                m.epoch += 1;
                epoch = m.epoch;
                m.attempt = 0;
                m.mode = None;
                m.last_error = None;
            },
        );
        if !started {
            tracing::debug!("connect() ignored, session already active");
            return Ok(());
        }

        let task = runtime.spawn(async move { me.run(epoch).await });
        let mut machine = self.machine.lock();
        if machine.epoch == epoch {
            machine.task = Some(task);
        } else {
            task.abort();
        }
        Ok(())
    }

    /// Tear the session down: cancel the pending timer or handshake, close the
    /// link and move to Idle. Observers have been notified when this returns.
    pub fn disconnect(&self) {
        let stopped = self.apply(
            |m| m.state != ConnectionState::Idle || m.task.is_some(),
            ConnectionState::Idle,
            |m| {
                m.epoch += 1;
                m.attempt = 0;
                m.mode = None;
                m.outbound = None;
                m.link_fault = None;
                if let Some(task) = m.task.take() {
                    task.abort();
                }
            },
        );
        if stopped {
            tracing::info!("Connection closed by caller");
        }
    }

    /// Send an application envelope.
    ///
    /// Fails with `NotConnected` unless Connected and `ReadOnlySession` on a
    /// guest session. Waits at most the send grace window for queue space;
    /// expiry is reported as `Transport` and the link is treated as broken.
    pub async fn send(&self, envelope: WireEnvelope) -> Result<()> {
        let (outbound, fault) = {
            let machine = self.machine.lock();
            if machine.state != ConnectionState::Connected {
                return Err(ClientError::NotConnected);
            }
            if machine.mode == Some(SessionMode::Guest) {
                return Err(ClientError::ReadOnlySession);
            }
            (machine.outbound.clone(), machine.link_fault.clone())
        };
        let outbound = outbound.ok_or(ClientError::NotConnected)?;
        let frame = envelope.to_frame()?;

        let grace = self.config.send_grace();
        let error = match timeout(grace, outbound.send(frame)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(_)) => ClientError::Transport("outbound queue closed".to_string()),
            Err(_) => ClientError::Transport(format!(
                "frame not accepted within {}ms",
                grace.as_millis()
            )),
        };

        if let Some(fault) = fault {
            fault.notify_one();
        }
        Err(error)
    }

    /// Enqueue a control command without waiting; allowed on guest sessions
    pub(crate) fn send_command(&self, command: Command) -> Result<()> {
        let outbound = {
            let machine = self.machine.lock();
            if machine.state != ConnectionState::Connected {
                return Err(ClientError::NotConnected);
            }
            machine.outbound.clone().ok_or(ClientError::NotConnected)?
        };

        let kind = command.kind();
        let frame = command.into_envelope().to_frame()?;
        outbound.try_send(frame).map_err(|e| {
            ClientError::Transport(format!("failed to enqueue {} command: {}", kind, e))
        })
    }

    /// Treat the current link as broken; the session reconnects and replays
    pub(crate) fn report_link_fault(&self) {
        let fault = self.machine.lock().link_fault.clone();
        if let Some(fault) = fault {
            fault.notify_one();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.lock().state
    }

    /// Latest transition
    pub fn snapshot(&self) -> StateChange {
        self.state_tx.borrow().clone()
    }

    /// Watch the latest transition asynchronously
    pub fn watch_state(&self) -> watch::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    pub fn is_guest(&self) -> bool {
        let machine = self.machine.lock();
        machine.state == ConnectionState::Connected && machine.mode == Some(SessionMode::Guest)
    }

    pub fn resolver(&self) -> &Arc<AuthFallbackResolver> {
        &self.resolver
    }

    /// Register an observer, invoked in registration order on every transition
    pub fn on_state_change<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((id, Arc::new(observer)));
        ObserverHandle {
            id,
            manager: self.me.clone(),
        }
    }

    /// Route decoded envelopes to `handler`; replaces any previous handler
    pub fn set_envelope_handler(&self, handler: Weak<dyn EnvelopeHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn remove_observer(&self, id: u64) {
        self.observers.write().retain(|(observer_id, _)| *observer_id != id);
    }

    /// Apply a transition if `guard` accepts the current machine.
    ///
    /// Transitions are strictly sequential; observers run under the gate so
    /// they see transitions in order, and may call back into the manager.
    fn apply<G, F>(&self, guard: G, to: ConnectionState, update: F) -> bool
    where
        G: FnOnce(&Machine) -> bool,
        F: FnOnce(&mut Machine),
    {
        let _gate = self.transition_gate.lock();

        let change = {
            let mut machine = self.machine.lock();
            if !guard(&machine) {
                return false;
            }
            let previous = machine.state;
            update(&mut machine);
            machine.state = to;
            StateChange {
                previous,
                state: to,
                attempt: machine.attempt,
                mode: if to == ConnectionState::Connected {
                    machine.mode
                } else {
                    None
                },
                last_error: machine.last_error.clone(),
                at: Utc::now(),
            }
        };

        ConnectionMetrics::record_transition(to.as_str(), to.as_gauge());
        match &change.last_error {
            Some(error) if to != ConnectionState::Connected && to != ConnectionState::Idle => {
                tracing::info!(
                    from = %change.previous,
                    state = %to,
                    attempt = change.attempt,
                    error = %error,
                    "Connection state changed"
                );
            }
            _ => {
                tracing::info!(
                    from = %change.previous,
                    state = %to,
                    attempt = change.attempt,
                    mode = ?change.mode,
                    "Connection state changed"
                );
            }
        }

        self.state_tx.send_replace(change.clone());

        let observers: Vec<StateObserver> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(&change))).is_err() {
                tracing::warn!(state = %to, "State observer panicked");
            }
        }

        true
    }

    fn apply_in(&self, epoch: u64, to: ConnectionState, update: impl FnOnce(&mut Machine)) -> bool {
        self.apply(|m| m.epoch == epoch, to, update)
    }

    async fn run(self: Arc<Self>, epoch: u64) {
        loop {
            let attempt = self.machine.lock().attempt;
            let window = self.scheduler.next_delay(attempt);
            let resolution = tokio::select! {
                biased;
                result = self.handshake() => Some(result),
                _ = tokio::time::sleep(window) => None,
            };

            // Set when the backoff interval already ran out during the handshake
            let mut waited = false;
            let error = match resolution {
                None => {
                    waited = true;
                    tracing::warn!(
                        attempt,
                        window_ms = window.as_millis() as u64,
                        "Handshake outlived its backoff interval, superseding it"
                    );
                    Some(ClientError::HandshakeTimeout {
                        timeout_ms: window.as_millis() as u64,
                    })
                }
                Some(Ok(Resolution { link, mode })) => {
                    let fault = Arc::new(Notify::new());
                    let outbound = link.outbound.clone();
                    let link_fault = fault.clone();
                    let connected = self.apply_in(epoch, ConnectionState::Connected, |m| {
                        m.attempt = 0;
                        m.mode = Some(mode);
                        m.last_error = None;
                        m.outbound = Some(outbound);
                        m.link_fault = Some(link_fault);
                    });
                    if !connected {
                        return;
                    }

                    let error = self.pump(link, fault).await;
                    tracing::warn!(error = %error, "Connection lost");
                    let dropped = self.apply_in(epoch, ConnectionState::Reconnecting, |m| {
                        m.attempt = 1;
                        m.mode = None;
                        m.outbound = None;
                        m.link_fault = None;
                        m.last_error = Some(error);
                    });
                    if !dropped {
                        return;
                    }
                    None
                }
                Some(Err(error)) => Some(error),
            };

            if let Some(error) = error {
                ConnectionMetrics::record_handshake_failure(error.kind());
                tracing::warn!(error = %error, retryable = error.is_retryable(), "Handshake failed");

                if !error.is_retryable() {
                    self.apply_in(epoch, ConnectionState::Errored, |m| {
                        m.last_error = Some(error);
                        m.task = None;
                    });
                    return;
                }

                let scheduled = self.apply_in(epoch, ConnectionState::Reconnecting, |m| {
                    m.attempt = m.attempt.saturating_add(1);
                    m.last_error = Some(error);
                });
                if !scheduled {
                    return;
                }
            }
            ConnectionMetrics::record_reconnect_attempt();

            let attempt = self.machine.lock().attempt;
            if self.scheduler.exhausted(attempt) {
                tracing::warn!(attempt, "Reconnect attempts exhausted");
                self.apply_in(epoch, ConnectionState::Disconnected, |m| {
                    m.task = None;
                });
                return;
            }

            if !waited {
                let delay = self.scheduler.next_delay(attempt.saturating_sub(1));
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                tokio::time::sleep(delay).await;
            }

            if !self.apply_in(epoch, ConnectionState::Connecting, |_| {}) {
                return;
            }
        }
    }

    /// One full credential resolution, bounded by the handshake timeout
    async fn handshake(&self) -> Result<Resolution> {
        let limit = self.config.handshake_timeout();
        match timeout(limit, self.resolver.resolve(self.connector.as_ref())).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::HandshakeTimeout {
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Drive an open link until it fails; returns the failure
    async fn pump(&self, mut link: TransportLink, fault: Arc<Notify>) -> ClientError {
        let mut ping = self.config.ping_interval().map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                frame = link.inbound.recv() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(error)) => return error,
                    None => return ClientError::Transport("connection closed".to_string()),
                },
                _ = fault.notified() => {
                    return ClientError::Transport("outbound queue rejected a frame".to_string());
                }
                _ = async {
                    match ping.as_mut() {
                        Some(interval) => {
                            interval.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let frame = match Command::Ping.into_envelope().to_frame() {
                        Ok(frame) => frame,
                        Err(error) => return error,
                    };
                    match link.outbound.try_send(frame) {
                        Ok(()) => tracing::trace!("Ping sent"),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!("Outbound queue full, skipping ping");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            return ClientError::Transport("outbound queue closed".to_string());
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                EnvelopeMetrics::record_malformed();
                tracing::warn!(error = %error, "Dropping malformed frame");
                return;
            }
        };

        let label = match &envelope.payload {
            Payload::Error { code, message } => {
                tracing::warn!(code = ?code, message = %message, "Server reported an error");
                envelope.kind()
            }
            Payload::SubscribeAck { channels } => {
                tracing::debug!(channels = ?channels, "Subscription acknowledged");
                envelope.kind()
            }
            // Server-defined types stay out of the label set
            Payload::Unknown { kind, .. } => {
                tracing::trace!(kind = %kind, "Envelope of unknown type");
                "unknown"
            }
            _ => envelope.kind(),
        };
        EnvelopeMetrics::record_received(label);

        let handler = self.handler.read().as_ref().and_then(Weak::upgrade);
        if let Some(handler) = handler {
            handler.handle(envelope);
        }
    }
}

/// Returned by [`ConnectionManager::on_state_change`]
#[derive(Debug, Clone)]
pub struct ObserverHandle {
    id: u64,
    manager: Weak<ConnectionManager>,
}

impl ObserverHandle {
    /// Stop receiving transitions; calling it again is a no-op
    pub fn remove(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_observer(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthPolicy;
    use crate::connection::transport::{Credential, LinkPeer};
    use crate::reconnect::BackoffPolicy;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Hands out scripted handshake results, keeping peers of opened links
    struct ScriptedConnector {
        script: Mutex<VecDeque<std::result::Result<(), ClientError>>>,
        peers: Mutex<Vec<LinkPeer>>,
        opened: AtomicU64,
    }

    impl ScriptedConnector {
        fn new(script: Vec<std::result::Result<(), ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                peers: Mutex::new(Vec::new()),
                opened: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(&self, _credential: &Credential) -> Result<TransportLink> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front().unwrap_or(Ok(()));
            next?;
            let (link, peer) = TransportLink::in_memory(4);
            self.peers.lock().push(peer);
            Ok(link)
        }
    }

    /// Never answers the first `stall` opens; later ones succeed
    struct StallingConnector {
        stall: u64,
        opened: AtomicU64,
        peers: Mutex<Vec<LinkPeer>>,
    }

    impl StallingConnector {
        fn new(stall: u64) -> Arc<Self> {
            Arc::new(Self {
                stall,
                opened: AtomicU64::new(0),
                peers: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Connector for StallingConnector {
        async fn open(&self, _credential: &Credential) -> Result<TransportLink> {
            if self.opened.fetch_add(1, Ordering::SeqCst) < self.stall {
                std::future::pending::<()>().await;
            }
            let (link, peer) = TransportLink::in_memory(4);
            self.peers.lock().push(peer);
            Ok(link)
        }
    }

    fn build_manager(
        connector: Arc<dyn Connector>,
        backoff: BackoffPolicy,
        handshake_timeout_ms: u64,
    ) -> Arc<ConnectionManager> {
        let resolver = Arc::new(AuthFallbackResolver::new(
            AuthPolicy {
                allow_guest_mode: false,
            },
            Some("opaque-token".to_string()),
            None,
        ));
        let config = ConnectionConfig {
            handshake_timeout_ms,
            send_grace_ms: 20,
            ping_interval_secs: 0,
            outbound_buffer: 4,
        };
        ConnectionManager::new(connector, resolver, ReconnectionScheduler::new(backoff), config)
    }

    fn backoff(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            base_delay_ms,
            max_delay_ms,
            jitter_ratio: 0.0,
            max_attempts,
        }
    }

    fn manager_with(connector: Arc<ScriptedConnector>, max_attempts: u32) -> Arc<ConnectionManager> {
        build_manager(connector, backoff(1, 5, max_attempts), 1_000)
    }

    fn record_changes(manager: &ConnectionManager) -> Arc<Mutex<Vec<StateChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.on_state_change(move |change| sink.lock().push(change.clone()));
        seen
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("timed out waiting for condition");
    }

    fn record_states(manager: &ConnectionManager) -> Arc<Mutex<Vec<(ConnectionState, u32)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.on_state_change(move |change| sink.lock().push((change.state, change.attempt)));
        seen
    }

    async fn wait_for(manager: &ConnectionManager, state: ConnectionState) -> StateChange {
        let mut rx = manager.watch_state();
        let change = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|change| change.state == state),
        )
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
        change.clone()
    }

    #[tokio::test]
    async fn test_connect_reaches_connected_and_is_idempotent() {
        let connector = ScriptedConnector::new(vec![]);
        let manager = manager_with(connector.clone(), 0);

        manager.connect().unwrap();
        manager.connect().unwrap();
        let change = wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(change.mode, Some(SessionMode::Authenticated));
        assert_eq!(change.attempt, 0);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_send_requires_connected() {
        let manager = manager_with(ScriptedConnector::new(vec![]), 0);
        let result = manager
            .send(WireEnvelope::new("custom", None, serde_json::Value::Null))
            .await;
        assert_eq!(result, Err(ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_send_delivers_frame() {
        let connector = ScriptedConnector::new(vec![]);
        let manager = manager_with(connector.clone(), 0);
        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        manager
            .send(WireEnvelope::new("custom", Some("demo".to_string()), serde_json::json!({"a": 1})))
            .await
            .unwrap();

        let frame = {
            let mut peers = connector.peers.lock();
            peers[0].from_client.try_recv().unwrap()
        };
        assert!(frame.contains("\"custom\""));
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_send_grace_expiry_breaks_link() {
        let connector = ScriptedConnector::new(vec![]);
        let manager = manager_with(connector.clone(), 0);
        let seen = record_states(&manager);
        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        // Nobody drains the peer, so the queue of 4 fills up
        for _ in 0..4 {
            manager
                .send(WireEnvelope::new("custom", None, serde_json::Value::Null))
                .await
                .unwrap();
        }
        let result = manager
            .send(WireEnvelope::new("custom", None, serde_json::Value::Null))
            .await;
        assert!(matches!(result, Err(ClientError::Transport(_))));

        wait_until(|| seen.lock().contains(&(ConnectionState::Reconnecting, 1))).await;
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_transport_drop_reconnects_and_resets_attempt() {
        let connector = ScriptedConnector::new(vec![]);
        let manager = manager_with(connector.clone(), 0);

        let seen = record_states(&manager);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        let peer = connector.peers.lock().remove(0);
        peer.fail("reset by peer").await;
        drop(peer);

        wait_until(|| seen.lock().len() >= 5).await;
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);

        let states = seen.lock().clone();
        assert_eq!(
            states,
            vec![
                (ConnectionState::Connecting, 0),
                (ConnectionState::Connected, 0),
                (ConnectionState::Reconnecting, 1),
                (ConnectionState::Connecting, 1),
                (ConnectionState::Connected, 0),
            ]
        );
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_attempts_exhausted_ends_disconnected() {
        let failures = (0..10)
            .map(|_| Err(ClientError::Transport("refused".to_string())))
            .collect();
        let connector = ScriptedConnector::new(failures);
        let manager = manager_with(connector.clone(), 2);

        manager.connect().unwrap();
        let change = wait_for(&manager, ConnectionState::Disconnected).await;

        assert_eq!(change.previous, ConnectionState::Reconnecting);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_observers_synchronously() {
        let manager = manager_with(ScriptedConnector::new(vec![]), 0);
        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        let idle = Arc::new(AtomicU64::new(0));
        let counter = idle.clone();
        let handle = manager.on_state_change(move |change| {
            if change.state == ConnectionState::Idle {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.disconnect();
        assert_eq!(idle.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Idle);

        // Second disconnect is a no-op, removed observers stay quiet
        handle.remove();
        handle.remove();
        manager.disconnect();
        assert_eq!(idle.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_block_others() {
        let manager = manager_with(ScriptedConnector::new(vec![]), 0);
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();

        manager.on_state_change(|_| panic!("observer failure"));
        manager.on_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;
        assert!(calls.load(Ordering::SeqCst) >= 2);
        manager.disconnect();
    }

    #[test]
    fn test_connect_outside_runtime_is_config_error() {
        let manager = manager_with(ScriptedConnector::new(vec![]), 0);
        assert!(matches!(manager.connect(), Err(ClientError::Config(_))));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_handshake_timeout_feeds_reconnect() {
        let connector = StallingConnector::new(u64::MAX);
        let manager = build_manager(connector.clone(), backoff(5_000, 5_000, 0), 20);
        let seen = record_changes(&manager);

        manager.connect().unwrap();
        wait_until(|| {
            seen.lock()
                .iter()
                .any(|c| c.state == ConnectionState::Reconnecting)
        })
        .await;

        let change = seen
            .lock()
            .iter()
            .find(|c| c.state == ConnectionState::Reconnecting)
            .cloned()
            .unwrap();
        assert_eq!(change.previous, ConnectionState::Connecting);
        assert_eq!(change.attempt, 1);
        assert_eq!(
            change.last_error,
            Some(ClientError::HandshakeTimeout { timeout_ms: 20 })
        );
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_slow_handshake_superseded_by_next_attempt() {
        let connector = StallingConnector::new(1);
        let manager = build_manager(connector.clone(), backoff(10, 10, 0), 3_000);
        let seen = record_changes(&manager);

        manager.connect().unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        let states: Vec<(ConnectionState, u32)> =
            seen.lock().iter().map(|c| (c.state, c.attempt)).collect();
        assert_eq!(
            states,
            vec![
                (ConnectionState::Connecting, 0),
                (ConnectionState::Reconnecting, 1),
                (ConnectionState::Connecting, 1),
                (ConnectionState::Connected, 0),
            ]
        );
        assert!(matches!(
            seen.lock()[1].last_error,
            Some(ClientError::HandshakeTimeout { .. })
        ));
        manager.disconnect();
    }
}
