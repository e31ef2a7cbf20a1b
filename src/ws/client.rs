//! Duplex stream client with fixed-backoff reconnection

use super::StreamError;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// Fixed delay between reconnection attempts
    pub reconnect_delay: Duration,
    /// Interval for keepalive pings
    pub ping_interval: Duration,
    /// Inbound channel capacity
    pub buffer_size: usize,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            buffer_size: 1024,
        }
    }

    pub fn reconnect_delay(mut self, d: Duration) -> Self {
        self.reconnect_delay = d;
        self
    }

    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }
}

/// Events surfaced to the consumer.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Connection established (or re-established); resubscribe on this.
    Connected,
    /// Text frame from the venue
    Text(String),
    /// Connection lost; a reconnect is already scheduled.
    Reconnecting { attempt: u32 },
}

/// Reconnecting duplex WebSocket client.
///
/// `connect` spawns a background task owning the socket and returns a
/// receiver for inbound events plus a sender for outbound text frames. On
/// error or close the task waits the fixed backoff and reconnects; it stops
/// only when the consumer drops both channel ends.
pub struct StreamClient {
    config: StreamConfig,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn connect(&self) -> (mpsc::Receiver<StreamEvent>, mpsc::Sender<String>) {
        let (event_tx, event_rx) = mpsc::channel(self.config.buffer_size);
        let (send_tx, send_rx) = mpsc::channel(256);
        let config = self.config.clone();

        tokio::spawn(async move {
            run_connection_loop(config, event_tx, send_rx).await;
        });

        (event_rx, send_tx)
    }
}

async fn run_connection_loop(
    config: StreamConfig,
    event_tx: mpsc::Sender<StreamEvent>,
    mut send_rx: mpsc::Receiver<String>,
) {
    let mut attempt: u32 = 0;

    loop {
        match connect_and_stream(&config, &event_tx, &mut send_rx).await {
            Ok(()) => {
                tracing::info!(url = %config.url, "Stream closed by consumer");
                return;
            }
            Err(e) => {
                attempt += 1;
                tracing::warn!(error = %e, attempt, "Stream connection lost, reconnecting");
            }
        }

        if event_tx.is_closed() {
            tracing::debug!("Event receiver dropped, stopping reconnection");
            return;
        }

        let _ = event_tx.send(StreamEvent::Reconnecting { attempt }).await;
        sleep(config.reconnect_delay).await;
    }
}

/// Run one connection until it fails or the consumer goes away.
///
/// Returns `Ok(())` only when the consumer dropped its channel ends; any
/// transport-level termination is an `Err` so the caller reconnects.
async fn connect_and_stream(
    config: &StreamConfig,
    event_tx: &mpsc::Sender<StreamEvent>,
    send_rx: &mut mpsc::Receiver<String>,
) -> Result<(), StreamError> {
    tracing::info!(url = %config.url, "Connecting to stream");

    let (ws_stream, _response) = connect_async(&config.url)
        .await
        .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    if event_tx.send(StreamEvent::Connected).await.is_err() {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(config.ping_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut waiting_for_pong = false;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(StreamEvent::Text(text)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await
                            .map_err(|e| StreamError::SendFailed(e.to_string()))?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        waiting_for_pong = false;
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err(StreamError::ConnectionFailed("close frame".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(StreamError::ConnectionFailed(e.to_string()));
                    }
                    None => {
                        return Err(StreamError::ConnectionFailed("stream ended".into()));
                    }
                }
            }

            msg = send_rx.recv() => {
                match msg {
                    Some(text) => {
                        write.send(Message::Text(text)).await
                            .map_err(|e| StreamError::SendFailed(e.to_string()))?;
                    }
                    None => return Ok(()),
                }
            }

            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    return Err(StreamError::ConnectionFailed("pong timeout".into()));
                }
                write.send(Message::Ping(vec![])).await
                    .map_err(|e| StreamError::SendFailed(e.to_string()))?;
                waiting_for_pong = true;
            }
        }
    }
}
