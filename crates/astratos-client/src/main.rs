//! `astratos-watch`: terminal dashboard for the live-metrics channel.
//!
//! Connects to the server, logs every snapshot's headline numbers, keeps a
//! rolling alert feed, and reports connection changes. Runs until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from environment variables
//! 3. Subscribe to `connection`, `SIMULATION_UPDATE`, `MESSAGE_RECEIVED`
//! 4. Connect and send a hello message once the channel opens
//! 5. Wait for Ctrl-C, then disconnect

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use astratos_client::{AlertFeed, ClientConfig, ConnectionManager};
use astratos_types::{CONNECTION_TOPIC, ConnectionEvent, ConnectionStatus, MetricsSnapshot};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the signal handler
/// cannot be installed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    init_tracing();

    info!("astratos-watch starting");

    // Load configuration from environment
    let config = ClientConfig::from_env().context("loading client configuration")?;
    info!(
        url = config.url,
        reconnect_delay_ms = u64::try_from(config.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
        alert_feed_size = config.alert_feed_size,
        "configuration loaded"
    );

    let feed = Arc::new(Mutex::new(AlertFeed::new(config.alert_feed_size)));
    let manager = ConnectionManager::websocket(config);

    // Subscriptions live for the whole process.
    let hello = manager.clone();
    let _status = manager.on(CONNECTION_TOPIC, move |payload| {
        match serde_json::from_value::<ConnectionEvent>(payload.clone()) {
            Ok(ConnectionEvent {
                status: ConnectionStatus::Connected,
            }) => {
                info!("live");
                if let Err(e) = hello.send(&json!({ "hello": "astratos-watch" })) {
                    warn!(error = %e, "hello not sent");
                }
            }
            Ok(ConnectionEvent {
                status: ConnectionStatus::Disconnected,
            }) => warn!("offline, waiting to reconnect"),
            Err(e) => warn!(error = %e, "unreadable connection event"),
        }
    });

    let updates_feed = Arc::clone(&feed);
    let _updates = manager.on("SIMULATION_UPDATE", move |payload| {
        match decode_snapshot(payload) {
            Ok(snapshot) => {
                log_snapshot(&snapshot);
                if !snapshot.alerts.is_empty() {
                    let mut feed = updates_feed.lock().unwrap_or_else(PoisonError::into_inner);
                    feed.extend(&snapshot.alerts);
                    for alert in &snapshot.alerts {
                        info!(kind = ?alert.kind, text = alert.text, held = feed.len(), "alert");
                    }
                }
            }
            Err(e) => warn!(error = %e, "skipping snapshot"),
        }
    });

    let _echoes = manager.on("MESSAGE_RECEIVED", |payload| {
        info!(echo = %payload, "server echoed message");
    });

    manager.connect();

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    manager.disconnect().await;

    let held = feed.lock().unwrap_or_else(PoisonError::into_inner).len();
    info!(alerts_held = held, "astratos-watch stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn decode_snapshot(payload: &Value) -> anyhow::Result<MetricsSnapshot> {
    serde_json::from_value(payload.clone()).context("SIMULATION_UPDATE payload is not a snapshot")
}

fn log_snapshot(snapshot: &MetricsSnapshot) {
    let number = |path: &str| snapshot.metric(path).and_then(astratos_types::MetricValue::as_f64);
    info!(
        at = %snapshot.timestamp,
        incoming = number("incoming"),
        outgoing = number("outgoing"),
        inventory = number("inventory"),
        sales = number("sales"),
        cpu = number("systemHealth.cpu"),
        memory = number("systemHealth.memory"),
        "snapshot"
    );
}
