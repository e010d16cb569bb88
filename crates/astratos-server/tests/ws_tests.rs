//! End-to-end tests for the live channel against a real listener.
//!
//! Each test binds `127.0.0.1:0` with a short fixed cadence and talks to
//! the server through a tokio-tungstenite client.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use astratos_pulse::{BroadcastConfig, PulseConfig, ServerSection};
use astratos_server::startup::{RunningServer, spawn_server};
use astratos_types::{Envelope, EnvelopeKind, MetricsSnapshot, WELCOME_MESSAGE};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start(interval_ms: u64, alert_chance: f64) -> RunningServer {
    let config = PulseConfig {
        server: ServerSection {
            host: "127.0.0.1".to_owned(),
            port: 0,
        },
        broadcast: BroadcastConfig {
            min_interval_ms: interval_ms,
            max_interval_ms: interval_ms,
            alert_chance,
        },
        ..PulseConfig::default()
    };
    spawn_server(&config).await.unwrap()
}

async fn connect(server: &RunningServer) -> Client {
    let url = format!("ws://{}/ws", server.local_addr());
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn next_envelope(client: &mut Client) -> Envelope {
    loop {
        let msg = tokio::time::timeout(WAIT, client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return Envelope::from_json(text.as_str()).unwrap();
        }
    }
}

async fn next_of_kind(client: &mut Client, kind: EnvelopeKind) -> Envelope {
    loop {
        let envelope = next_envelope(client).await;
        if envelope.kind() == Some(kind) {
            return envelope;
        }
    }
}

#[tokio::test]
async fn welcome_arrives_before_any_update() {
    let server = start(50, 0.0).await;
    let mut client = connect(&server).await;

    let first = next_envelope(&mut client).await;
    assert_eq!(first.kind(), Some(EnvelopeKind::ConnectionEstablished));
    assert_eq!(first.payload["message"], WELCOME_MESSAGE);
    assert!(first.payload["timestamp"].is_string());

    server.shutdown().await;
}

#[tokio::test]
async fn bare_host_url_reaches_the_channel() {
    let server = start(50, 0.0).await;
    let (mut client, _) = connect_async(format!("ws://{}", server.local_addr()))
        .await
        .unwrap();

    let first = next_envelope(&mut client).await;
    assert_eq!(first.kind(), Some(EnvelopeKind::ConnectionEstablished));
    next_of_kind(&mut client, EnvelopeKind::SimulationUpdate).await;
    assert_eq!(server.state().registry.len().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn updates_carry_a_full_snapshot() {
    let server = start(50, 1.0).await;
    let mut client = connect(&server).await;

    let update = next_of_kind(&mut client, EnvelopeKind::SimulationUpdate).await;
    let snapshot: MetricsSnapshot = serde_json::from_value(update.payload).unwrap();

    let table = astratos_pulse::RangeTable::canonical();
    for (path, bound) in table.iter() {
        let value = snapshot.metric(path).unwrap();
        assert!(bound.contains(value), "{path} out of range");
    }
    assert_eq!(snapshot.alerts.len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn client_json_is_echoed_back() {
    let server = start(60_000, 0.0).await;
    let mut client = connect(&server).await;
    next_of_kind(&mut client, EnvelopeKind::ConnectionEstablished).await;

    let body = json!({ "type": "PING", "payload": { "n": 7 } });
    client.send(Message::text(body.to_string())).await.unwrap();

    let echo = next_of_kind(&mut client, EnvelopeKind::MessageReceived).await;
    assert_eq!(echo.payload, body);

    server.shutdown().await;
}

#[tokio::test]
async fn malformed_client_text_keeps_the_socket_open() {
    let server = start(60_000, 0.0).await;
    let mut client = connect(&server).await;
    next_of_kind(&mut client, EnvelopeKind::ConnectionEstablished).await;

    client.send(Message::text("{not json")).await.unwrap();
    client.send(Message::text(r#"{"ok":true}"#)).await.unwrap();

    let echo = next_of_kind(&mut client, EnvelopeKind::MessageReceived).await;
    assert_eq!(echo.payload, json!({ "ok": true }));

    server.shutdown().await;
}

#[tokio::test]
async fn every_client_receives_the_broadcast() {
    let server = start(50, 0.0).await;
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;

    next_of_kind(&mut a, EnvelopeKind::SimulationUpdate).await;
    next_of_kind(&mut b, EnvelopeKind::SimulationUpdate).await;

    server.shutdown().await;
}

#[tokio::test]
async fn closed_client_is_unregistered() {
    let server = start(60_000, 0.0).await;
    let mut client = connect(&server).await;
    next_of_kind(&mut client, EnvelopeKind::ConnectionEstablished).await;
    assert_eq!(server.state().registry.len().await, 1);

    client.close(None).await.unwrap();
    drop(client);

    let registry = std::sync::Arc::clone(&server.state().registry);
    tokio::time::timeout(WAIT, async {
        while !registry.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    server.shutdown().await;
}
