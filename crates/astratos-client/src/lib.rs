//! Client side of the Astratos live-metrics channel.
//!
//! A dashboard holds one [`ConnectionManager`], subscribes callbacks per
//! envelope type, and calls [`ConnectionManager::connect`] once. The
//! manager keeps the WebSocket open, reconnecting after a fixed backoff
//! whenever it drops, and reports its own status on the `connection`
//! topic.
//!
//! ```text
//! server --frames--> Transport --> ConnectionManager --> SubscriberRegistry --> callbacks
//! ```
//!
//! # Modules
//!
//! - [`config`] -- Environment-driven [`ClientConfig`]
//! - [`transport`] -- The [`Connector`] seam and its WebSocket implementation
//! - [`subscribers`] -- Topic to ordered callback lists
//! - [`manager`] -- Connection lifecycle, reconnects, dispatch
//! - [`feed`] -- Rolling list of recent alerts
//! - [`error`] -- [`ClientError`]

pub mod config;
pub mod error;
pub mod feed;
pub mod manager;
pub mod subscribers;
pub mod transport;

pub use config::ClientConfig;
pub use error::ClientError;
pub use feed::AlertFeed;
pub use manager::{ConnectionManager, ConnectionState};
pub use subscribers::{Callback, SubscriberRegistry, Subscription};
pub use transport::{Connector, Transport, WsConnector};
