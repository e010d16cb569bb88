//! Error types for the Astratos server.
//!
//! The broadcast channel itself has no fatal errors; everything here is
//! about getting the server up (configuration, binding) and keeping the
//! HTTP listener alive.

use astratos_pulse::ConfigError;

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}
