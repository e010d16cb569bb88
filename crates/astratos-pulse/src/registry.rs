//! Connection registry: the set of live server-side sockets.
//!
//! The registry is the only shared mutable state on the broadcast path.
//! Accept and close events mutate it from independent socket tasks while
//! the scheduler iterates it, so [`ConnectionRegistry::broadcast`] copies
//! the membership under a read lock and sends after releasing it.
//!
//! Sends are fire-and-forget: [`Connection::send`] only enqueues a frame
//! for the socket's writer task. A stalled client therefore never delays
//! delivery to anyone else, and once its queue is full further frames for
//! it are dropped until it catches up.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use astratos_types::{ConnectionId, Envelope, EnvelopeError};
use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Readiness of a registered socket, mirroring the browser `WebSocket`
/// `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake not finished; not yet eligible for broadcasts.
    Connecting = 0,
    /// Eligible for broadcasts.
    Open = 1,
    /// Close handshake in progress.
    Closing = 2,
    /// Gone. Pruned from the registry on the next broadcast.
    Closed = 3,
}

impl ReadyState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Lock-free cell holding a [`ReadyState`].
#[derive(Debug)]
pub struct ReadyCell(AtomicU8);

impl ReadyCell {
    /// Create a cell in the given state.
    pub const fn new(state: ReadyState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    pub fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replace the state.
    pub fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Capacity of each socket's outbound queue, in frames.
pub const QUEUE_CAPACITY: usize = 256;

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The socket's writer has gone away.
    #[error("connection closed")]
    Closed,
    /// The socket's queue is full; this frame was dropped.
    #[error("connection lagging, frame dropped")]
    Full,
}

/// One registered socket as the registry sees it.
///
/// Implementations must not block in [`send`](Connection::send).
pub trait Connection: Send + Sync {
    /// Registry key. Stable for the life of the socket.
    fn id(&self) -> ConnectionId;

    /// Peer address, when known.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Readiness at this instant.
    fn ready_state(&self) -> ReadyState;

    /// Enqueue one text frame for delivery.
    fn send(&self, frame: Arc<str>) -> Result<(), SendError>;

    /// Record that the socket is gone.
    fn mark_closed(&self);
}

/// [`Connection`] backed by a bounded queue drained by a writer task.
///
/// Holds at most [`QUEUE_CAPACITY`] undelivered frames.
#[derive(Debug)]
pub struct QueuedConnection {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    state: ReadyCell,
    tx: mpsc::Sender<Arc<str>>,
}

impl QueuedConnection {
    /// Create an `Open` connection and the receiver its writer drains.
    pub fn open(remote_addr: Option<SocketAddr>) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        Self::with_state(remote_addr, ReadyState::Open)
    }

    /// Create a connection in an explicit initial state.
    pub fn with_state(
        remote_addr: Option<SocketAddr>,
        state: ReadyState,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            remote_addr,
            state: ReadyCell::new(state),
            tx,
        });
        (conn, rx)
    }

    /// Move to a new readiness state.
    pub fn set_state(&self, state: ReadyState) {
        self.state.set(state);
    }
}

impl Connection for QueuedConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, frame: Arc<str>) -> Result<(), SendError> {
        if self.state.get() == ReadyState::Closed {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn mark_closed(&self) {
        self.state.set(ReadyState::Closed);
    }
}

/// Outcome of one [`ConnectionRegistry::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the frame was enqueued for.
    pub delivered: usize,
    /// Members skipped: not `Open` (and not closed), or lagging with a
    /// full queue.
    pub skipped: usize,
    /// Members removed: already `Closed`, or their send failed.
    pub dropped: usize,
}

/// Set of currently registered connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    members: RwLock<BTreeMap<ConnectionId, Arc<dyn Connection>>>,
}

impl core::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and greet it.
    ///
    /// On first registration a `CONNECTION_ESTABLISHED` envelope is sent to
    /// this connection only, before any broadcast can reach it. Registering
    /// an id that is already present is a no-op. If the welcome cannot be
    /// sent the connection is marked closed and never joins.
    ///
    /// Returns whether the connection is now registered.
    pub async fn register(&self, conn: Arc<dyn Connection>) -> bool {
        let id = conn.id();
        let welcome = Envelope::connection_established(Utc::now()).and_then(|env| env.to_json());
        let welcome: Arc<str> = match welcome {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(connection_id = %id, error = %e, "failed to encode welcome");
                return false;
            }
        };

        {
            let mut members = self.members.write().await;
            if members.contains_key(&id) {
                debug!(connection_id = %id, "duplicate registration ignored");
                return false;
            }
            // Broadcasts copy membership under the read lock, so the welcome
            // is queued ahead of any of them.
            if let Err(e) = conn.send(welcome) {
                debug!(connection_id = %id, error = %e, "welcome send failed, dropping connection");
                conn.mark_closed();
                return false;
            }
            members.insert(id, Arc::clone(&conn));
        }
        info!(
            connection_id = %id,
            remote_addr = ?conn.remote_addr(),
            "connection registered"
        );
        true
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.members.write().await.remove(&id).is_some();
        if removed {
            info!(connection_id = %id, "connection unregistered");
        }
        removed
    }

    /// Whether `id` is currently registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().await.contains_key(&id)
    }

    /// Number of registered connections (any readiness).
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Send `text` to every member that is `Open` at send time.
    ///
    /// `Connecting` and `Closing` members are skipped, as are members whose
    /// queue is full. `Closed` members and members whose writer is gone
    /// are removed; neither aborts the loop.
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        let members: Vec<Arc<dyn Connection>> =
            self.members.read().await.values().cloned().collect();

        let frame: Arc<str> = Arc::from(text);
        let mut report = BroadcastReport::default();
        let mut gone = Vec::new();

        for conn in members {
            match conn.ready_state() {
                ReadyState::Open => match conn.send(Arc::clone(&frame)) {
                    Ok(()) => report.delivered = report.delivered.saturating_add(1),
                    Err(SendError::Full) => {
                        debug!(connection_id = %conn.id(), "connection lagging, skipped frame");
                        report.skipped = report.skipped.saturating_add(1);
                    }
                    Err(e @ SendError::Closed) => {
                        debug!(connection_id = %conn.id(), error = %e, "broadcast send failed");
                        conn.mark_closed();
                        gone.push(conn.id());
                    }
                },
                ReadyState::Closed => gone.push(conn.id()),
                ReadyState::Connecting | ReadyState::Closing => {
                    report.skipped = report.skipped.saturating_add(1);
                }
            }
        }

        for id in gone {
            if self.unregister(id).await {
                report.dropped = report.dropped.saturating_add(1);
            }
        }
        report
    }

    /// Serialize `envelope` once and broadcast it.
    pub async fn broadcast_envelope(
        &self,
        envelope: &Envelope,
    ) -> Result<BroadcastReport, EnvelopeError> {
        let json = envelope.to_json()?;
        Ok(self.broadcast(&json).await)
    }

    /// Handle a text frame a client sent.
    ///
    /// Valid JSON is echoed back to the sender inside a `MESSAGE_RECEIVED`
    /// envelope. Anything else is logged and dropped. Returns whether an
    /// echo was enqueued.
    pub async fn handle_incoming(&self, id: ConnectionId, text: &str) -> bool {
        let payload: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "dropping malformed client message");
                return false;
            }
        };
        debug!(connection_id = %id, "client message received");

        let Some(conn) = self.members.read().await.get(&id).cloned() else {
            return false;
        };
        let json = match Envelope::message_received(payload).to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "failed to encode echo");
                return false;
            }
        };
        match conn.send(Arc::from(json)) {
            Ok(()) => true,
            Err(SendError::Full) => {
                debug!(connection_id = %id, "connection lagging, echo dropped");
                false
            }
            Err(SendError::Closed) => {
                conn.mark_closed();
                self.unregister(id).await;
                false
            }
        }
    }
}
