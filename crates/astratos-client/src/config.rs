//! Configuration for the Astratos client.
//!
//! All configuration is loaded from environment variables. The client only
//! needs to know where the server is, how long to wait between reconnect
//! attempts, and how many alerts the rolling feed keeps.

use std::time::Duration;

use crate::error::ClientError;

/// Default WebSocket endpoint.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:5000/ws";

/// Default fixed delay between reconnect attempts, in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// Default number of alerts kept by the rolling feed.
pub const DEFAULT_ALERT_FEED_SIZE: usize = 5;

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the server's `/ws` endpoint.
    pub url: String,
    /// Fixed backoff between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Capacity of the alert feed.
    pub alert_feed_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            alert_feed_size: DEFAULT_ALERT_FEED_SIZE,
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at `url` with default timings.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Optional variables:
    /// - `ASTRATOS_URL` -- server WebSocket URL (default `ws://127.0.0.1:5000/ws`)
    /// - `RECONNECT_DELAY_MS` -- reconnect backoff in milliseconds (default 3000)
    /// - `ALERT_FEED_SIZE` -- alerts kept by the feed (default 5)
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let url = lookup("ASTRATOS_URL").unwrap_or_else(|| DEFAULT_URL.to_owned());
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ClientError::Config(format!(
                "ASTRATOS_URL must be a ws:// or wss:// URL, got {url}"
            )));
        }

        let reconnect_delay_ms: u64 = lookup("RECONNECT_DELAY_MS")
            .unwrap_or_else(|| DEFAULT_RECONNECT_DELAY_MS.to_string())
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid RECONNECT_DELAY_MS: {e}")))?;

        let alert_feed_size: usize = lookup("ALERT_FEED_SIZE")
            .unwrap_or_else(|| DEFAULT_ALERT_FEED_SIZE.to_string())
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid ALERT_FEED_SIZE: {e}")))?;
        if alert_feed_size == 0 {
            return Err(ClientError::Config(
                "ALERT_FEED_SIZE must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            url,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            alert_feed_size,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ClientConfig::from_lookup(vars(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.alert_feed_size, 5);
    }

    #[test]
    fn overrides_are_applied() {
        let config = ClientConfig::from_lookup(vars(&[
            ("ASTRATOS_URL", "wss://metrics.example.com/ws"),
            ("RECONNECT_DELAY_MS", "250"),
            ("ALERT_FEED_SIZE", "10"),
        ]))
        .unwrap();
        assert_eq!(config.url, "wss://metrics.example.com/ws");
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.alert_feed_size, 10);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(ClientConfig::from_lookup(vars(&[("ASTRATOS_URL", "http://x/ws")])).is_err());
        assert!(ClientConfig::from_lookup(vars(&[("RECONNECT_DELAY_MS", "soon")])).is_err());
        assert!(ClientConfig::from_lookup(vars(&[("ALERT_FEED_SIZE", "0")])).is_err());
    }
}
