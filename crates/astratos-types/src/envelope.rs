//! The `{type, payload}` envelope wrapping every message on the channel.
//!
//! The server only ever emits the three [`EnvelopeKind`]s. The envelope
//! itself keeps `type` as an open string so clients can route any topic,
//! including ones they do not know about, to whoever subscribed to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::metrics::MetricsSnapshot;

/// Client-side topic carrying [`ConnectionEvent`]s from the connection
/// manager itself (never sent by the server).
pub const CONNECTION_TOPIC: &str = "connection";

/// Human-readable welcome sent point-to-point on registration.
pub const WELCOME_MESSAGE: &str = "Connected to Astratos server";

/// Errors raised while building or decoding an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload or the envelope could not be (de)serialized.
    #[error("envelope serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Message types the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum EnvelopeKind {
    /// Point-to-point welcome sent once on registration.
    ConnectionEstablished,
    /// Broadcast metrics snapshot.
    SimulationUpdate,
    /// Echo of a message the client sent.
    MessageReceived,
}

impl EnvelopeKind {
    /// Wire name of this kind (the value of the envelope's `type`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "CONNECTION_ESTABLISHED",
            Self::SimulationUpdate => "SIMULATION_UPDATE",
            Self::MessageReceived => "MESSAGE_RECEIVED",
        }
    }

    /// Parse a wire name. Returns `None` for unknown topics.
    pub fn from_wire(name: &str) -> Option<Self> {
        [
            Self::ConnectionEstablished,
            Self::SimulationUpdate,
            Self::MessageReceived,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == name)
    }
}

impl core::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Envelope {
    /// Discriminator; decides how `payload` is interpreted downstream.
    #[serde(rename = "type")]
    pub topic: String,
    /// Opaque payload.
    pub payload: Value,
}

/// Payload of a `CONNECTION_ESTABLISHED` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConnectionEstablished {
    /// Welcome text.
    pub message: String,
    /// Instant the connection was registered.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wrap an already-encoded payload.
    pub fn new(kind: EnvelopeKind, payload: Value) -> Self {
        Self {
            topic: kind.as_str().to_owned(),
            payload,
        }
    }

    /// Encode `payload` and wrap it.
    pub fn encode<T: Serialize>(kind: EnvelopeKind, payload: &T) -> Result<Self, EnvelopeError> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Welcome envelope for a freshly registered connection.
    pub fn connection_established(at: DateTime<Utc>) -> Result<Self, EnvelopeError> {
        Self::encode(
            EnvelopeKind::ConnectionEstablished,
            &ConnectionEstablished {
                message: WELCOME_MESSAGE.to_owned(),
                timestamp: at,
            },
        )
    }

    /// Broadcast envelope for one generated snapshot.
    pub fn simulation_update(snapshot: &MetricsSnapshot) -> Result<Self, EnvelopeError> {
        Self::encode(EnvelopeKind::SimulationUpdate, snapshot)
    }

    /// Echo envelope carrying back whatever the client sent.
    pub fn message_received(echo: Value) -> Self {
        Self::new(EnvelopeKind::MessageReceived, echo)
    }

    /// The known kind of this envelope, if it is one the server emits.
    pub fn kind(&self) -> Option<EnvelopeKind> {
        EnvelopeKind::from_wire(&self.topic)
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Status carried on the [`CONNECTION_TOPIC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ConnectionStatus {
    /// The channel just opened.
    Connected,
    /// The channel just closed or failed.
    Disconnected,
}

/// Payload of a [`CONNECTION_TOPIC`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConnectionEvent {
    /// New channel status.
    pub status: ConnectionStatus,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn kinds_round_trip_through_wire_names() {
        for kind in [
            EnvelopeKind::ConnectionEstablished,
            EnvelopeKind::SimulationUpdate,
            EnvelopeKind::MessageReceived,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
            assert_eq!(EnvelopeKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(EnvelopeKind::from_wire("connection"), None);
    }

    #[test]
    fn welcome_envelope_shape() {
        let env = Envelope::connection_established(Utc::now()).unwrap();
        let json: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "CONNECTION_ESTABLISHED");
        assert_eq!(json["payload"]["message"], WELCOME_MESSAGE);
        assert!(json["payload"]["timestamp"].is_string());
    }

    #[test]
    fn simulation_update_carries_snapshot() {
        let snapshot = MetricsSnapshot {
            timestamp: Utc::now(),
            metrics: BTreeMap::new(),
            alerts: Vec::new(),
        };
        let env = Envelope::simulation_update(&snapshot).unwrap();
        assert_eq!(env.kind(), Some(EnvelopeKind::SimulationUpdate));
        let decoded: MetricsSnapshot = serde_json::from_value(env.payload).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn unknown_topics_still_decode() {
        let env = Envelope::from_json(r#"{"type":"INVENTORY_CHANGED","payload":{"sku":"A1"}}"#)
            .unwrap();
        assert_eq!(env.topic, "INVENTORY_CHANGED");
        assert!(env.kind().is_none());
    }

    #[test]
    fn malformed_text_is_an_error() {
        assert!(Envelope::from_json("not json").is_err());
        assert!(Envelope::from_json(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn connection_event_shape() {
        let json = serde_json::to_value(ConnectionEvent {
            status: ConnectionStatus::Disconnected,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"status": "disconnected"}));
    }
}
