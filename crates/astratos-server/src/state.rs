//! Shared application state for the Astratos server.
//!
//! [`AppState`] holds the connection registry the broadcast scheduler fans
//! out to. Socket tasks register into it on upgrade and unregister on close.
//! They also watch the shutdown signal, so stopping the server closes every
//! open socket instead of leaving upgraded connections behind.

use std::sync::Arc;
use std::time::Instant;

use astratos_pulse::ConnectionRegistry;
use tokio::sync::watch;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live WebSocket connections.
    pub registry: Arc<ConnectionRegistry>,
    /// When the server process started serving.
    pub started_at: Instant,
    /// Flipped to `true` once the server begins shutting down.
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Create state with an empty registry.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(ConnectionRegistry::new()))
    }

    /// Create state around an existing registry.
    pub fn with_registry(registry: Arc<ConnectionRegistry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            started_at: Instant::now(),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Tell every socket task to close.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether [`begin_shutdown`](Self::begin_shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A receiver that changes when shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Seconds since the state was created.
    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
