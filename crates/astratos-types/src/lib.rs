//! Shared type definitions for the Astratos real-time metrics channel.
//!
//! Everything that crosses the wire between the broadcast server and the
//! dashboard client is defined here. Types flow downstream to `TypeScript`
//! via `ts-rs` for the browser UI.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for connections and subscriptions
//! - [`metrics`] -- Metric bounds, sampled values, and snapshots
//! - [`alert`] -- Alerts attached to snapshots
//! - [`envelope`] -- The `{type, payload}` wire envelope and connection events

pub mod alert;
pub mod envelope;
pub mod ids;
pub mod metrics;

// Re-export all public types at crate root for convenience.
pub use alert::{Alert, AlertKind};
pub use envelope::{
    CONNECTION_TOPIC, ConnectionEstablished, ConnectionEvent, ConnectionStatus, Envelope,
    EnvelopeError, EnvelopeKind, WELCOME_MESSAGE,
};
pub use ids::{ConnectionId, SubscriptionId};
pub use metrics::{MetricBound, MetricValue, MetricsSnapshot, PATH_SEPARATOR};
