//! Integration tests for the HTTP surface.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;

use astratos_pulse::{ConnectionRegistry, QueuedConnection};
use astratos_server::router::build_router;
use astratos_server::state::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
    let router = build_router(state);
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn health_reports_ok_with_no_connections() {
    let state = Arc::new(AppState::new());
    let (status, json) = get_json(state, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["connections"], 0);
    assert!(json["uptime"].as_f64().unwrap() >= 0.0);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn health_counts_registered_connections() {
    let registry = Arc::new(ConnectionRegistry::new());
    let (a, _rx_a) = QueuedConnection::open(None);
    let (b, _rx_b) = QueuedConnection::open(None);
    registry.register(a).await;
    registry.register(b).await;

    let state = Arc::new(AppState::with_registry(registry));
    let (status, json) = get_json(state, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["connections"], 2);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let state = Arc::new(AppState::new());
    let (status, _) = get_json(state, "/api/inventory").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn plain_get_on_ws_without_upgrade_is_rejected() {
    let state = Arc::new(AppState::new());
    let (status, _) = get_json(state, "/ws").await;
    assert!(status.is_client_error() || status.is_server_error());
}

#[tokio::test]
async fn plain_get_on_root_is_the_channel_not_a_page() {
    let state = Arc::new(AppState::new());
    let (status, _) = get_json(state, "/").await;
    assert_ne!(status, StatusCode::NOT_FOUND);
    assert!(!status.is_success());
}
