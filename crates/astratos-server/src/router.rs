//! Axum router construction for the Astratos server.
//!
//! Assembles the `WebSocket` channel and the health probe into a single
//! [`Router`] with CORS enabled for the browser dashboard.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /ws` -- `WebSocket` live metrics channel
/// - `GET /` -- the same channel, for clients given only `ws://host:port`
/// - `GET /api/health` -- liveness probe
///
/// CORS is configured to allow any origin for development. In
/// production this should be restricted.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(ws::ws_channel))
        .route("/ws", get(ws::ws_channel))
        .route("/api/health", get(handlers::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
