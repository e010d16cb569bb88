//! Error types for the Astratos client.
//!
//! Transport failures never reach subscribers; the connection manager
//! recovers from them by reconnecting. These variants surface only where
//! a caller asked for something directly (loading config, sending).

/// Errors that can occur during client operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The WebSocket handshake failed or the server was unreachable.
    #[error("connect error: {0}")]
    Connect(String),

    /// The open transport failed while reading or writing.
    #[error("transport error: {0}")]
    Transport(String),

    /// A send was attempted with no open transport.
    #[error("not connected")]
    NotConnected,

    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
