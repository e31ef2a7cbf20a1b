//! Order-book subscription multiplexer
//!
//! Keeps one stream connection subscribed to the token set of every enabled
//! strategy's current cycle and routes best-bid updates to the execution
//! engine. The token map is rebuilt wholesale on (re)connect, on strategy
//! changes, shortly after the soonest cycle end, and opportunistically when
//! a message arrives for a cycle that has already rolled over. Rebuilds are
//! idempotent, so firing them redundantly is harmless.

use crate::cycle;
use crate::engine::TriggerEngine;
use crate::market::CachedResolver;
use crate::strategy::{Strategy, StrategyStore};
use crate::ws::{StreamClient, StreamConfig, StreamEvent};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{sleep_until, Instant};

/// Notification that the strategy set changed and the subscription map
/// should be rebuilt.
#[derive(Debug, Clone, Copy)]
pub struct StrategyChange;

/// Destination for qualifying price events. The execution engine is the
/// production sink; tests substitute a recorder.
#[async_trait]
pub trait CandidateSink: Send + Sync {
    async fn on_candidate_price(
        &self,
        strategy: &Strategy,
        period_start: i64,
        market_title: Option<&str>,
        token_ids: &[String],
        outcome_index: usize,
        best_bid: Decimal,
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl CandidateSink for TriggerEngine {
    async fn on_candidate_price(
        &self,
        strategy: &Strategy,
        period_start: i64,
        market_title: Option<&str>,
        token_ids: &[String],
        outcome_index: usize,
        best_bid: Decimal,
    ) -> anyhow::Result<()> {
        TriggerEngine::on_candidate_price(
            self,
            strategy,
            period_start,
            market_title,
            token_ids,
            outcome_index,
            best_bid,
        )
        .await
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Market-data stream URL
    pub ws_url: String,
    /// Fixed reconnect backoff
    pub reconnect_delay: Duration,
    /// Slack after the soonest cycle end before the proactive resubscribe
    pub resubscribe_grace: Duration,
}

/// One (strategy, cycle, outcome) interest in a token's best bid.
#[derive(Clone)]
pub struct WatchEntry {
    pub strategy: Strategy,
    pub period_start: i64,
    pub market_title: Option<String>,
    pub token_ids: Arc<Vec<String>>,
    pub outcome_index: usize,
}

type SubscriptionMap = HashMap<String, Vec<WatchEntry>>;

#[derive(Serialize)]
struct SubscribeCommand<'a> {
    #[serde(rename = "type")]
    channel: &'static str,
    assets_ids: &'a [String],
}

pub struct BookWatcher {
    config: WatcherConfig,
    strategies: Arc<dyn StrategyStore>,
    resolver: Arc<CachedResolver>,
    sink: Arc<dyn CandidateSink>,
    /// Swapped wholesale on resubscribe; readers clone the Arc.
    entries: RwLock<Arc<SubscriptionMap>>,
}

impl BookWatcher {
    pub fn new(
        config: WatcherConfig,
        strategies: Arc<dyn StrategyStore>,
        resolver: Arc<CachedResolver>,
        sink: Arc<dyn CandidateSink>,
    ) -> Self {
        Self {
            config,
            strategies,
            resolver,
            sink,
            entries: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Run the watcher until the stream task dies (it reconnects forever, so
    /// in practice until shutdown).
    pub async fn run(
        self: Arc<Self>,
        mut changes: mpsc::Receiver<StrategyChange>,
    ) -> anyhow::Result<()> {
        let client = StreamClient::new(
            StreamConfig::new(&self.config.ws_url).reconnect_delay(self.config.reconnect_delay),
        );
        let (mut events, sender) = client.connect();
        let mut refresh_at: Option<Instant> = None;
        let mut changes_open = true;

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(StreamEvent::Connected) => {
                            refresh_at = self.resubscribe(&sender).await;
                        }
                        Some(StreamEvent::Text(text)) => {
                            if self.rollover_due().await {
                                tracing::debug!("Cycle rollover detected, resubscribing");
                                refresh_at = self.resubscribe(&sender).await;
                            }
                            self.handle_message(&text).await;
                        }
                        Some(StreamEvent::Reconnecting { attempt }) => {
                            tracing::info!(attempt, "Market stream reconnecting");
                        }
                        None => anyhow::bail!("market stream task ended"),
                    }
                }

                change = changes.recv(), if changes_open => {
                    match change {
                        Some(StrategyChange) => {
                            tracing::info!("Strategy set changed, resubscribing");
                            refresh_at = self.resubscribe(&sender).await;
                        }
                        None => changes_open = false,
                    }
                }

                _ = async { sleep_until(refresh_at.unwrap_or_else(Instant::now)).await },
                    if refresh_at.is_some() =>
                {
                    tracing::debug!("Cycle end reached, resubscribing");
                    refresh_at = self.resubscribe(&sender).await;
                }
            }
        }
    }

    /// Rebuild the subscription map and send the subscribe command. Returns
    /// the next proactive refresh deadline.
    async fn resubscribe(&self, sender: &mpsc::Sender<String>) -> Option<Instant> {
        let now = Utc::now().timestamp();
        let built = self.build_subscription_map(now).await;

        *self.entries.write().await = Arc::new(built.map);
        metrics::gauge!("polytail_watched_tokens").set(built.token_ids.len() as f64);

        if !built.token_ids.is_empty() {
            let command = SubscribeCommand {
                channel: "MARKET",
                assets_ids: &built.token_ids,
            };
            match serde_json::to_string(&command) {
                Ok(message) => {
                    if sender.send(message).await.is_err() {
                        tracing::warn!("Stream sender closed, subscribe command dropped");
                    } else {
                        tracing::info!(
                            tokens = built.token_ids.len(),
                            "Subscribed to cycle market tokens"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode subscribe command"),
            }
        }

        built.next_cycle_end.map(|end| {
            let delay = Duration::from_secs(end.saturating_sub(now).max(0) as u64)
                + self.config.resubscribe_grace;
            Instant::now() + delay
        })
    }

    /// Resolve every enabled strategy's current cycle and index interests by
    /// token id. Strategies whose trade window already ended contribute no
    /// tokens this cycle but still drive the refresh deadline.
    async fn build_subscription_map(&self, now: i64) -> BuiltSubscription {
        let strategies = match self.strategies.enabled().await {
            Ok(strategies) => strategies,
            Err(e) => {
                tracing::warn!(error = %e, "Strategy fetch failed, keeping empty subscription");
                Vec::new()
            }
        };

        let mut map: SubscriptionMap = HashMap::new();
        let mut token_ids: Vec<String> = Vec::new();
        let mut next_cycle_end: Option<i64> = None;

        for strategy in strategies {
            let period_start = cycle::period_start(now, strategy.interval_seconds);
            let cycle_end = cycle::period_end(period_start, strategy.interval_seconds);
            next_cycle_end = Some(next_cycle_end.map_or(cycle_end, |e| e.min(cycle_end)));

            let (_, window_end) = cycle::window_bounds(&strategy, period_start);
            if now >= window_end {
                continue;
            }

            let market = match self
                .resolver
                .resolve_cycle(&strategy, period_start, now)
                .await
            {
                Ok(Some(market)) => market,
                Ok(None) => {
                    tracing::debug!(
                        strategy_id = strategy.id,
                        period_start,
                        "Cycle market not listed yet"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(strategy_id = strategy.id, error = %e, "Cycle market resolution failed");
                    continue;
                }
            };

            let tokens = Arc::new(market.token_ids.clone());
            for (outcome_index, token_id) in market.token_ids.iter().enumerate() {
                if !token_ids.contains(token_id) {
                    token_ids.push(token_id.clone());
                }
                map.entry(token_id.clone()).or_default().push(WatchEntry {
                    strategy: strategy.clone(),
                    period_start,
                    market_title: market.title.clone(),
                    token_ids: tokens.clone(),
                    outcome_index,
                });
            }
        }

        BuiltSubscription {
            token_ids,
            map,
            next_cycle_end,
        }
    }

    /// Whether any subscribed entry belongs to a cycle that has rolled over.
    async fn rollover_due(&self) -> bool {
        let entries = self.entries.read().await.clone();
        let now = Utc::now().timestamp();
        entries.values().flatten().any(|entry| {
            cycle::period_start(now, entry.strategy.interval_seconds) != entry.period_start
        })
    }

    /// Parse one stream message and dispatch its best-bid updates.
    async fn handle_message(&self, text: &str) {
        let updates = parse_best_bids(text);
        if updates.is_empty() {
            return;
        }

        let entries = self.entries.read().await.clone();
        let now = Utc::now().timestamp();

        for (token_id, best_bid) in updates {
            let Some(interested) = entries.get(&token_id) else {
                continue;
            };
            for entry in eligible(interested, now) {
                let sink = self.sink.clone();
                let entry = entry.clone();
                tokio::spawn(async move {
                    if let Err(e) = sink
                        .on_candidate_price(
                            &entry.strategy,
                            entry.period_start,
                            entry.market_title.as_deref(),
                            &entry.token_ids,
                            entry.outcome_index,
                            best_bid,
                        )
                        .await
                    {
                        tracing::error!(
                            strategy_id = entry.strategy.id,
                            period_start = entry.period_start,
                            error = %e,
                            "Candidate price handling failed"
                        );
                    }
                });
            }
        }
    }

    #[cfg(test)]
    async fn snapshot_tokens(&self, now: i64) -> Vec<String> {
        self.build_subscription_map(now).await.token_ids
    }
}

struct BuiltSubscription {
    token_ids: Vec<String>,
    map: SubscriptionMap,
    next_cycle_end: Option<i64>,
}

/// Entries whose trade window contains `now`. Outside-window entries are
/// simply not interested; that is not an error.
fn eligible(entries: &[WatchEntry], now: i64) -> Vec<&WatchEntry> {
    entries
        .iter()
        .filter(|entry| cycle::in_window(&entry.strategy, entry.period_start, now))
        .collect()
}

/// Extract `(token_id, best_bid)` updates from a stream message. Handles
/// both single events and event arrays; `book` snapshots carry the best bid
/// first in `bids`, `price_change` events carry it per asset.
fn parse_best_bids(text: &str) -> Vec<(String, Decimal)> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return Vec::new();
    };

    let mut updates = Vec::new();
    match value {
        serde_json::Value::Array(events) => {
            for event in &events {
                collect_event_bids(event, &mut updates);
            }
        }
        event => collect_event_bids(&event, &mut updates),
    }
    updates
}

fn collect_event_bids(event: &serde_json::Value, updates: &mut Vec<(String, Decimal)>) {
    match event.get("event_type").and_then(|t| t.as_str()) {
        Some("book") => {
            let Some(asset_id) = event.get("asset_id").and_then(|a| a.as_str()) else {
                return;
            };
            let Some(price) = event
                .get("bids")
                .and_then(|b| b.as_array())
                .and_then(|bids| bids.first())
                .and_then(|level| level.get("price"))
                .and_then(|p| p.as_str())
                .and_then(|p| Decimal::from_str(p).ok())
            else {
                return;
            };
            updates.push((asset_id.to_string(), price));
        }
        Some("price_change") => {
            let Some(changes) = event.get("price_changes").and_then(|c| c.as_array()) else {
                return;
            };
            for change in changes {
                let Some(asset_id) = change.get("asset_id").and_then(|a| a.as_str()) else {
                    continue;
                };
                let Some(best_bid) = change
                    .get("best_bid")
                    .and_then(|p| p.as_str())
                    .and_then(|p| Decimal::from_str(p).ok())
                else {
                    continue;
                };
                updates.push((asset_id.to_string(), best_bid));
            }
        }
        _ => {}
    }
}
