//! Reconnecting connection manager.
//!
//! [`ConnectionManager`] owns one transport at a time and fans every
//! decoded envelope out to topic subscribers. Its lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Connected
//!      ^                          |                    |
//!      |                     attempt failed      close / error
//!      |                          v                    v
//!      +---------- backoff <-- Disconnected <----------+
//! ```
//!
//! Every transition into and out of `Connected` is announced on the
//! `connection` topic as `{"status": "connected" | "disconnected"}`, once
//! per transition. Failed attempts from `Connecting` announce nothing.
//! After a loss the manager waits a fixed backoff and tries again, forever,
//! until [`ConnectionManager::disconnect`] is called.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use astratos_types::{CONNECTION_TOPIC, ConnectionEvent, ConnectionStatus, Envelope};
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::subscribers::{SubscriberRegistry, Subscription};
use crate::transport::{Connector, Transport, WsConnector};

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport, and either idle or waiting out the backoff.
    Disconnected = 0,
    /// An attempt to open a transport is in flight.
    Connecting = 1,
    /// A transport is open and being read.
    Connected = 2,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// How a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The transport closed or failed.
    Lost,
    /// `disconnect()` was called.
    Shutdown,
}

/// One driver task generation.
struct Driver {
    shutdown: watch::Sender<bool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    subscribers: Arc<SubscriberRegistry>,
    state: AtomicU8,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    driver: Mutex<Option<Driver>>,
}

/// Shared handle to the live-metrics connection.
///
/// Cheap to clone; every clone drives the same connection and subscriber
/// set.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("subscribers", &self.inner.subscribers)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a disconnected manager that opens transports with
    /// `connector`.
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                subscribers: Arc::new(SubscriberRegistry::new()),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                outbound: Mutex::new(None),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Create a disconnected manager speaking WebSocket.
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(config, Arc::new(WsConnector))
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Start connecting.
    ///
    /// A no-op while connecting or connected. While waiting out a
    /// reconnect backoff, retries immediately. Must be called from within
    /// a Tokio runtime.
    pub fn connect(&self) {
        let mut driver = self.inner.lock_driver();
        if let Some(active) = driver.as_ref().filter(|d| !d.task.is_finished()) {
            if self.state() == ConnectionState::Disconnected {
                debug!("connect requested during backoff, retrying now");
                active.wake.notify_one();
            }
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());
        self.inner.set_state(ConnectionState::Connecting);
        let task = tokio::spawn(drive(
            Arc::clone(&self.inner),
            shutdown_rx,
            Arc::clone(&wake),
        ));
        *driver = Some(Driver {
            shutdown,
            wake,
            task,
        });
    }

    /// Close the transport and stop reconnecting. Idempotent.
    ///
    /// If a session was open, subscribers see one `disconnected` event
    /// before this returns. Must not be awaited from inside a callback.
    pub async fn disconnect(&self) {
        let driver = self.inner.lock_driver().take();
        let Some(driver) = driver else {
            return;
        };

        info!(url = self.inner.config.url, "disconnecting");
        let _ = driver.shutdown.send(true);
        if let Err(e) = driver.task.await {
            warn!(error = %e, "connection driver ended abnormally");
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Register `callback` for envelopes whose `type` is `topic`.
    ///
    /// The `connection` topic carries the manager's own status events.
    /// Callbacks run on the receive task, in registration order, and must
    /// not block.
    pub fn on<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(topic, callback)
    }

    /// Send `message` to the server as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] without an open transport,
    /// [`ClientError::Transport`] if its writer has already shut down, or
    /// [`ClientError::Serde`] if `message` does not serialize.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), ClientError> {
        let text = serde_json::to_string(message)?;
        let outbound = self.inner.lock_outbound();
        let sender = outbound.as_ref().ok_or(ClientError::NotConnected)?;
        sender
            .send(text)
            .map_err(|e| ClientError::Transport(format!("writer closed: {e}")))
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock_driver(&self) -> MutexGuard<'_, Option<Driver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_status(&self, status: ConnectionStatus) {
        match serde_json::to_value(ConnectionEvent { status }) {
            Ok(payload) => {
                self.subscribers.dispatch(CONNECTION_TOPIC, &payload);
            }
            Err(e) => warn!(error = %e, "failed to encode connection event"),
        }
    }

    fn dispatch_text(&self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed envelope");
                return;
            }
        };
        let delivered = self.subscribers.dispatch(&envelope.topic, &envelope.payload);
        debug!(topic = envelope.topic, delivered, "envelope dispatched");
    }

    /// Pump one open transport until it ends or shutdown is requested.
    async fn run_session(
        &self,
        transport: Transport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let Transport {
            mut inbound,
            outbound,
        } = transport;
        *self.lock_outbound() = Some(outbound);
        self.set_state(ConnectionState::Connected);
        info!(url = self.config.url, "connected");
        self.emit_status(ConnectionStatus::Connected);

        let end = loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.dispatch_text(&text),
                    Some(Err(e)) => {
                        warn!(error = %e, "transport failed");
                        break SessionEnd::Lost;
                    }
                    None => {
                        info!("server closed the connection");
                        break SessionEnd::Lost;
                    }
                },
                _ = shutdown.changed() => break SessionEnd::Shutdown,
            }
        };

        self.lock_outbound().take();
        self.set_state(ConnectionState::Disconnected);
        self.emit_status(ConnectionStatus::Disconnected);
        end
    }
}

/// Connect, pump, back off, repeat until shutdown.
async fn drive(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>, wake: Arc<Notify>) {
    loop {
        inner.set_state(ConnectionState::Connecting);
        // This attempt answers any wake-up still pending from the last backoff.
        let _ = wake.notified().now_or_never();
        let attempt = tokio::select! {
            attempt = inner.connector.connect(&inner.config.url) => attempt,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok(transport) => {
                if inner.run_session(transport, &mut shutdown).await == SessionEnd::Shutdown {
                    break;
                }
            }
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                warn!(error = %e, "connection attempt failed");
            }
        }

        debug!(
            delay_ms = u64::try_from(inner.config.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting after backoff"
        );
        tokio::select! {
            () = tokio::time::sleep(inner.config.reconnect_delay) => {}
            () = wake.notified() => {}
            _ = shutdown.changed() => break,
        }
    }
    inner.set_state(ConnectionState::Disconnected);
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::arithmetic_side_effects
)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::future::{BoxFuture, ready};
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;

    const DELAY: Duration = Duration::from_millis(3000);

    /// The far end of one fake transport.
    struct FakeSession {
        to_client: mpsc::UnboundedSender<Result<String, ClientError>>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl FakeSession {
        fn push(&self, text: &str) {
            self.to_client.send(Ok(text.to_owned())).unwrap();
        }
    }

    /// Succeeds or fails per a scripted plan, then succeeds forever.
    struct FakeConnector {
        plan: Mutex<VecDeque<bool>>,
        attempts: AtomicUsize,
        sessions: mpsc::UnboundedSender<FakeSession>,
    }

    impl FakeConnector {
        fn new(plan: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeSession>) {
            let (sessions, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                plan: Mutex::new(plan.iter().copied().collect()),
                attempts: AtomicUsize::new(0),
                sessions,
            });
            (connector, rx)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Connector for FakeConnector {
        fn connect(&self, _url: &str) -> BoxFuture<'static, Result<Transport, ClientError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let succeed = self.plan.lock().unwrap().pop_front().unwrap_or(true);
            if !succeed {
                return Box::pin(ready(Err(ClientError::Connect("refused".to_owned()))));
            }

            let (to_client, rx) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            let _ = self.sessions.send(FakeSession {
                to_client,
                from_client,
            });
            let inbound = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed();
            Box::pin(ready(Ok(Transport { inbound, outbound })))
        }
    }

    fn manager(plan: &[bool]) -> (ConnectionManager, Arc<FakeConnector>, mpsc::UnboundedReceiver<FakeSession>) {
        let (connector, sessions) = FakeConnector::new(plan);
        let config = ClientConfig {
            reconnect_delay: DELAY,
            ..ClientConfig::default()
        };
        let manager = ConnectionManager::new(config, Arc::clone(&connector) as Arc<dyn Connector>);
        (manager, connector, sessions)
    }

    fn record(manager: &ConnectionManager, topic: &str) -> (Subscription, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = manager.on(topic, move |payload| {
            let _ = tx.send(payload.clone());
        });
        (sub, rx)
    }

    fn status(event: &Value) -> &str {
        event["status"].as_str().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn starts_disconnected_and_connects() {
        let (manager, connector, mut sessions) = manager(&[]);
        let (_sub, mut events) = record(&manager, CONNECTION_TOPIC);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect();
        let _session = sessions.recv().await.unwrap();
        assert_eq!(status(&events.recv().await.unwrap()), "connected");
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(connector.attempts(), 1);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let (manager, connector, mut sessions) = manager(&[]);
        manager.connect();
        manager.connect();
        let _session = sessions.recv().await.unwrap();
        manager.connect();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(sessions.try_recv().is_err());

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn envelopes_reach_subscribers_of_their_type() {
        let (manager, _connector, mut sessions) = manager(&[]);
        let (_updates, mut updates) = record(&manager, "SIMULATION_UPDATE");
        let (_echoes, mut echoes) = record(&manager, "MESSAGE_RECEIVED");

        manager.connect();
        let session = sessions.recv().await.unwrap();
        session.push(r#"{"type":"SIMULATION_UPDATE","payload":{"metrics":{"incoming":42}}}"#);
        session.push(r#"{"type":"MESSAGE_RECEIVED","payload":{"ping":1}}"#);

        let update = updates.recv().await.unwrap();
        assert_eq!(update["metrics"]["incoming"], 42);
        assert_eq!(echoes.recv().await.unwrap(), json!({"ping": 1}));

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_envelope_is_dropped() {
        let (manager, _connector, mut sessions) = manager(&[]);
        let (_sub, mut updates) = record(&manager, "SIMULATION_UPDATE");

        manager.connect();
        let session = sessions.recv().await.unwrap();
        session.push("{definitely not json");
        session.push(r#"{"payload":{"missing":"type"}}"#);
        session.push(r#"{"type":"SIMULATION_UPDATE","payload":{"n":2}}"#);

        assert_eq!(updates.recv().await.unwrap(), json!({"n": 2}));
        assert!(updates.try_recv().is_err());
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_subscriber_does_not_kill_the_connection() {
        let (manager, _connector, mut sessions) = manager(&[]);
        let _boom = manager.on("SIMULATION_UPDATE", |_| panic!("render failed"));
        let (_sub, mut updates) = record(&manager, "SIMULATION_UPDATE");

        manager.connect();
        let session = sessions.recv().await.unwrap();
        session.push(r#"{"type":"SIMULATION_UPDATE","payload":1}"#);
        session.push(r#"{"type":"SIMULATION_UPDATE","payload":2}"#);

        assert_eq!(updates.recv().await.unwrap(), json!(1));
        assert_eq!(updates.recv().await.unwrap(), json!(2));
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_close_emits_one_disconnect_then_reconnects() {
        let (manager, connector, mut sessions) = manager(&[]);
        let (_sub, mut events) = record(&manager, CONNECTION_TOPIC);

        manager.connect();
        let first = sessions.recv().await.unwrap();
        assert_eq!(status(&events.recv().await.unwrap()), "connected");

        let lost_at = Instant::now();
        drop(first);
        assert_eq!(status(&events.recv().await.unwrap()), "disconnected");
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let _second = sessions.recv().await.unwrap();
        assert!(lost_at.elapsed() >= DELAY);
        assert_eq!(status(&events.recv().await.unwrap()), "connected");
        assert!(events.try_recv().is_err());
        assert_eq!(connector.attempts(), 2);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_is_treated_as_a_close() {
        let (manager, _connector, mut sessions) = manager(&[]);
        let (_sub, mut events) = record(&manager, CONNECTION_TOPIC);

        manager.connect();
        let first = sessions.recv().await.unwrap();
        events.recv().await.unwrap();

        first
            .to_client
            .send(Err(ClientError::Transport("connection reset".to_owned())))
            .unwrap();
        assert_eq!(status(&events.recv().await.unwrap()), "disconnected");

        let _second = sessions.recv().await.unwrap();
        assert_eq!(status(&events.recv().await.unwrap()), "connected");
        assert!(events.try_recv().is_err());

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_announce_nothing_and_keep_retrying() {
        let (manager, connector, mut sessions) = manager(&[false, false, true]);
        let (_sub, mut events) = record(&manager, CONNECTION_TOPIC);
        let started = Instant::now();

        manager.connect();
        let _session = sessions.recv().await.unwrap();

        assert_eq!(connector.attempts(), 3);
        assert!(started.elapsed() >= DELAY * 2);
        assert_eq!(status(&events.recv().await.unwrap()), "connected");
        assert!(events.try_recv().is_err());

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_during_backoff_retries_immediately() {
        let (manager, connector, mut sessions) = manager(&[false, true]);
        let started = Instant::now();

        manager.connect();
        while connector.attempts() == 0 || manager.state() != ConnectionState::Disconnected {
            tokio::task::yield_now().await;
        }

        manager.connect();
        let _session = sessions.recv().await.unwrap();
        assert!(started.elapsed() < DELAY);
        assert_eq!(connector.attempts(), 2);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_during_backoff_skips_only_one_wait() {
        let (manager, connector, _sessions) = manager(&[false, false, false, false]);

        manager.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts(), 1);

        // Both calls land before the driver runs again.
        manager.connect();
        manager.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts(), 2);

        // The second attempt failed too; it still waits out a full backoff.
        tokio::time::sleep(DELAY - Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connector.attempts(), 3);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_reconnecting() {
        let (manager, connector, mut sessions) = manager(&[]);
        let (_sub, mut events) = record(&manager, CONNECTION_TOPIC);

        manager.connect();
        let _session = sessions.recv().await.unwrap();
        events.recv().await.unwrap();

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(status(&events.recv().await.unwrap()), "disconnected");

        manager.disconnect().await;
        tokio::time::sleep(DELAY * 4).await;
        assert_eq!(connector.attempts(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_disconnect_starts_a_new_driver() {
        let (manager, connector, mut sessions) = manager(&[]);
        manager.connect();
        let _first = sessions.recv().await.unwrap();
        manager.disconnect().await;

        manager.connect();
        let _second = sessions.recv().await.unwrap();
        assert_eq!(connector.attempts(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_an_open_transport() {
        let (manager, _connector, mut sessions) = manager(&[]);
        assert!(matches!(
            manager.send(&json!({"ping": 1})),
            Err(ClientError::NotConnected)
        ));

        manager.connect();
        let mut session = sessions.recv().await.unwrap();
        manager.send(&json!({"ping": 2})).unwrap();
        assert_eq!(session.from_client.recv().await.unwrap(), r#"{"ping":2}"#);

        manager.disconnect().await;
        assert!(matches!(
            manager.send(&json!({"ping": 3})),
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_callbacks_stop_receiving() {
        let (manager, _connector, mut sessions) = manager(&[]);
        let (first, mut first_rx) = record(&manager, "SIMULATION_UPDATE");
        let (_second, mut second_rx) = record(&manager, "SIMULATION_UPDATE");

        manager.connect();
        let session = sessions.recv().await.unwrap();
        first.unsubscribe();
        first.unsubscribe();
        session.push(r#"{"type":"SIMULATION_UPDATE","payload":7}"#);

        assert_eq!(second_rx.recv().await.unwrap(), json!(7));
        assert!(first_rx.try_recv().is_err());

        manager.disconnect().await;
    }
}
