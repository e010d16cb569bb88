//! Operational alerts attached to metrics snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Severity/tone of an alert as rendered by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum AlertKind {
    /// Neutral notification.
    Info,
    /// Something completed successfully.
    Success,
    /// Something needs attention.
    Warning,
}

/// A single alert raised alongside one [`MetricsSnapshot`].
///
/// [`MetricsSnapshot`]: crate::metrics::MetricsSnapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Alert {
    /// Alert tone.
    #[serde(rename = "type")]
    pub kind: AlertKind,
    /// Human-readable message.
    pub text: String,
    /// Wall-clock milliseconds at creation. Unique per creation instant.
    pub id: i64,
    /// Instant the alert was raised.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Stamp an alert with the given instant; the id is derived from it.
    pub fn raised_at(kind: AlertKind, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            text: text.into(),
            id: at.timestamp_millis(),
            timestamp: at,
        }
    }
}
