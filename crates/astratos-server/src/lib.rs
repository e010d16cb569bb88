//! Astratos live-metrics server.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) that welcomes each client with
//!   `CONNECTION_ESTABLISHED`, pushes a `SIMULATION_UPDATE` snapshot on
//!   every broadcast tick, and echoes client JSON as `MESSAGE_RECEIVED`
//! - **Health probe** (`/api/health`) reporting uptime and the live
//!   connection count
//!
//! # Architecture
//!
//! Each upgraded socket is adapted to a queued connection and registered
//! with the shared [`ConnectionRegistry`]. The broadcast scheduler from
//! `astratos-pulse` fans snapshots out through that registry; socket
//! tasks drain their own queue, so one slow client never holds up the
//! others.
//!
//! [`ConnectionRegistry`]: astratos_pulse::ConnectionRegistry

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

pub use error::ServerError;
pub use router::build_router;
pub use startup::{RunningServer, spawn_server};
pub use state::AppState;
