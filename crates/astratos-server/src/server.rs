//! HTTP server lifecycle management.
//!
//! [`bind`] resolves and binds the listen address; [`serve`] runs the
//! Axum server on a bound listener until the shutdown future resolves.
//! Splitting the two lets callers bind port 0 and learn the real address
//! before serving.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use astratos_pulse::ServerSection;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::ServerError;
use crate::router::build_router;
use crate::state::AppState;

/// Bind a TCP listener for the configured host and port.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is malformed or the
/// listener cannot bind.
pub async fn bind(config: &ServerSection) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// Connection info is attached so the `WebSocket` handler can record the
/// peer address.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] if the server hits a fatal I/O error.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Serve(format!("no local address: {e}")))?;
    let router = build_router(state);

    info!(%addr, "Astratos server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;

    Ok(())
}
