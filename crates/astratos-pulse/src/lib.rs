//! Server-side core of the Astratos real-time metrics channel.
//!
//! Snapshots of synthetic inventory metrics are generated on a cadence and
//! fanned out to every open WebSocket connection:
//!
//! ```text
//! BroadcastScheduler -> SnapshotGenerator -> Envelope -> ConnectionRegistry -> sockets
//! ```
//!
//! # Modules
//!
//! - [`config`] -- YAML/env configuration and the metric [`RangeTable`]
//! - [`generator`] -- Bounded-random [`MetricsSnapshot`] generation
//! - [`cadence`] -- Fixed or randomized delay between ticks
//! - [`scheduler`] -- The broadcast loop and its control handle
//! - [`registry`] -- Live connection membership and fan-out
//!
//! Transport is out of scope here: the server crate adapts sockets to the
//! [`Connection`] trait.
//!
//! [`MetricsSnapshot`]: astratos_types::MetricsSnapshot

pub mod cadence;
pub mod config;
pub mod generator;
pub mod registry;
pub mod scheduler;

pub use cadence::Cadence;
pub use config::{BroadcastConfig, ConfigError, PulseConfig, RangeTable, ServerSection};
pub use generator::{ALERT_CATALOG, AlertTemplate, SnapshotGenerator};
pub use registry::{
    BroadcastReport, Connection, ConnectionRegistry, QUEUE_CAPACITY, QueuedConnection, ReadyCell,
    ReadyState, SendError,
};
pub use scheduler::{BroadcastScheduler, SchedulerHandle, SchedulerPhase};
