//! Reconnecting WebSocket client
//!
//! Duplex channel over tokio-tungstenite with a fixed reconnect backoff that
//! never gives up. The watcher keeps exactly one of these alive for the
//! market-data stream.

mod client;

pub use client::{StreamClient, StreamConfig, StreamEvent};

use thiserror::Error;

/// WebSocket transport errors.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
}
