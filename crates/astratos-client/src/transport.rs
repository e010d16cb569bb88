//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens one [`Transport`]: a stream of inbound text frames
//! plus a sender for outbound ones. The production [`WsConnector`] speaks
//! WebSocket through `tokio-tungstenite`; tests substitute scripted
//! connectors.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::error::ClientError;

/// One open channel to the server.
///
/// The inbound stream ends when the server closes the channel. Dropping
/// `outbound` closes the writing half.
pub struct Transport {
    /// Text frames from the server, in arrival order.
    pub inbound: BoxStream<'static, Result<String, ClientError>>,
    /// Text frames to the server.
    pub outbound: mpsc::UnboundedSender<String>,
}

impl core::fmt::Debug for Transport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports.
pub trait Connector: Send + Sync {
    /// Open a transport to `url`.
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport, ClientError>>;
}

/// [`Connector`] over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport, ClientError>> {
        let url = url.to_owned();
        Box::pin(async move {
            debug!(url = url, "opening WebSocket");
            let (ws_stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| ClientError::Connect(format!("failed to connect to {url}: {e}")))?;
            info!(url = url, "WebSocket connected");

            let (mut ws_sender, ws_receiver) = ws_stream.split();

            let (outbound, mut rx) = mpsc::unbounded_channel::<String>();
            tokio::spawn(async move {
                while let Some(text) = rx.recv().await {
                    if let Err(e) = ws_sender.send(Message::text(text)).await {
                        debug!(error = %e, "WebSocket write failed");
                        return;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let inbound = ws_receiver
                .filter_map(|frame| async move {
                    match frame {
                        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                        Ok(_) => None,
                        Err(e) => Some(Err(ClientError::Transport(e.to_string()))),
                    }
                })
                .boxed();

            Ok(Transport { inbound, outbound })
        })
    }
}
