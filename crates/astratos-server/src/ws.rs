//! `WebSocket` handler for the live metrics channel.
//!
//! Clients connect to `GET /ws` or the bare root `GET /`. Each socket is adapted to a
//! [`QueuedConnection`] and registered, which queues the
//! `CONNECTION_ESTABLISHED` welcome. The socket task then multiplexes two
//! directions:
//!
//! - frames the registry queued (welcome, broadcasts, echoes) are written
//!   to the socket in order;
//! - text the client sends is handed to the registry, which echoes valid
//!   JSON back as `MESSAGE_RECEIVED`.
//!
//! A slow socket only ever stalls its own task. On close, error, or server
//! shutdown the connection is marked closed and unregistered.

use std::net::SocketAddr;
use std::sync::Arc;

use astratos_pulse::{Connection, QueuedConnection};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::debug;

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and join the
/// broadcast.
///
/// # Route
///
/// `GET /ws`, and `GET /` for dashboards that connect to the bare host.
pub async fn ws_channel(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, addr, state))
}

/// Drive one socket until it closes.
async fn handle_ws(mut socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let (conn, mut outbound) = QueuedConnection::open(Some(addr));
    let id = conn.id();
    debug!(connection_id = %id, %addr, "WebSocket client connected");

    let mut closing = state.shutdown_signal();
    if !state.registry.register(conn.clone()).await {
        debug!(connection_id = %id, "registration refused, closing socket");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    while !*closing.borrow_and_update() {
        tokio::select! {
            // Frame queued by the registry for this socket.
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if socket.send(Message::Text(frame.as_ref().into())).await.is_err() {
                    debug!(connection_id = %id, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            // Something from the client.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.registry.handle_incoming(id, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(connection_id = %id, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(connection_id = %id, "WebSocket error: {e}");
                        break;
                    }
                    Some(Ok(Message::Binary(_) | Message::Pong(_))) => {}
                }
            }
            // Server shutting down.
            _ = closing.changed() => {
                debug!(connection_id = %id, "closing WebSocket for shutdown");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    conn.mark_closed();
    state.registry.unregister(id).await;
}
