//! REST endpoint handlers for the Astratos server.
//!
//! The CRUD collections live elsewhere; the only REST surface here is a
//! health probe reporting uptime and how many sockets are registered.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/health` | Liveness, uptime, live connection count |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};

use crate::state::AppState;

/// Response body for `GET /api/health`.
#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Instant the probe was answered.
    pub timestamp: DateTime<Utc>,
    /// Seconds since the server started.
    pub uptime: f64,
    /// Registered WebSocket connections.
    pub connections: usize,
}

/// Report liveness.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        uptime: state.uptime_secs(),
        connections: state.registry.len().await,
    })
}
