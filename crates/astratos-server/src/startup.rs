//! Server startup helper.
//!
//! [`spawn_server`] binds the listener, starts the broadcast scheduler
//! against a fresh registry, and serves the router on a background Tokio
//! task. The returned [`RunningServer`] owns both halves and shuts them
//! down together.
//!
//! # Usage
//!
//! ```rust,ignore
//! use astratos_pulse::PulseConfig;
//! use astratos_server::startup::spawn_server;
//!
//! let server = spawn_server(&PulseConfig::default()).await?;
//! println!("listening on {}", server.local_addr());
//! server.shutdown().await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use astratos_pulse::{BroadcastScheduler, PulseConfig, SchedulerHandle, SnapshotGenerator};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::ServerError;
use crate::server;
use crate::state::AppState;

/// A server running on background tasks.
#[derive(Debug)]
pub struct RunningServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    scheduler: SchedulerHandle,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningServer {
    /// The address the listener actually bound, resolving port 0.
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared state, including the connection registry.
    pub const fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Broadcast scheduler control handle.
    pub const fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Stop broadcasting, close every open socket, and gracefully shut the
    /// HTTP server down.
    ///
    /// Waits for the scheduler loop and the serve task to finish.
    pub async fn shutdown(self) {
        self.scheduler.stop();
        self.scheduler.join().await;
        self.state.begin_shutdown();

        if self.shutdown_tx.send(()).is_err() {
            warn!("server task already gone before shutdown");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "server task ended abnormally");
        }
        info!("Astratos server stopped");
    }
}

/// Bind, start broadcasting, and serve on background tasks.
///
/// The configuration is validated first. Binding happens before
/// spawning, so bind failures are reported here rather than logged from
/// the background task.
///
/// # Errors
///
/// Returns [`ServerError::Config`] for an invalid configuration and
/// [`ServerError::Bind`] if the listener cannot bind.
pub async fn spawn_server(config: &PulseConfig) -> Result<RunningServer, ServerError> {
    config.validate()?;

    let listener = server::bind(&config.server).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;

    let state = Arc::new(AppState::new());
    let scheduler = BroadcastScheduler::start(
        Arc::clone(&state.registry),
        SnapshotGenerator::from_config(config),
        config.broadcast.cadence(),
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let serve_state = Arc::clone(&state);
    let task = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = server::serve(listener, serve_state, shutdown).await {
            error!(error = %e, "Astratos server exited with error");
        }
    });

    info!(%addr, "Astratos server spawned on background task");

    Ok(RunningServer {
        addr,
        state,
        scheduler,
        shutdown_tx,
        task,
    })
}
