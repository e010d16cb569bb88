//! Astratos server binary.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `ASTRATOS_CONFIG` or `astratos.yaml`,
//!    then apply `HOST` / `PORT` / `ALERT_CHANCE` overrides
//! 3. Bind, start the broadcast scheduler, and serve
//! 4. Wait for Ctrl-C and shut down gracefully

use astratos_pulse::PulseConfig;
use astratos_server::startup::spawn_server;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application entry point for the Astratos server.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the listener cannot
/// bind.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    init_tracing();

    info!("astratos-server starting");

    // 2. Load configuration.
    let config = PulseConfig::load()?;
    info!(
        host = config.server.host,
        port = config.server.port,
        min_interval_ms = config.broadcast.min_interval_ms,
        max_interval_ms = config.broadcast.max_interval_ms,
        alert_chance = config.broadcast.alert_chance,
        metrics = config.metrics.len(),
        "Configuration loaded"
    );

    // 3. Serve.
    let server = spawn_server(&config).await?;
    info!(addr = %server.local_addr(), "WebSocket endpoint ready at /ws");

    // 4. Wait for shutdown.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    server.shutdown().await;

    Ok(())
}

/// `RUST_LOG` controls the filter (default `info`); `LOG_FORMAT=json`
/// switches to JSON lines.
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
