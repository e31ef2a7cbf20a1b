//! Gamma API client for cycle-market lookup
//!
//! Cycle markets are addressed by slug on the venue's Gamma events endpoint.
//! The event carries the market's title, on-chain condition id and the CLOB
//! token ids for each outcome (encoded as a JSON string inside JSON).

use super::{CycleMarket, MarketResolver};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Gamma API base URL
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Configuration for the Gamma client
#[derive(Debug, Clone)]
pub struct GammaConfig {
    /// Base URL for the Gamma API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            base_url: GAMMA_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Client for the venue's Gamma metadata API.
pub struct GammaClient {
    config: GammaConfig,
    client: Client,
}

impl GammaClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(GammaConfig::default())
    }

    pub fn with_config(config: GammaConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn fetch_event(&self, slug: &str) -> anyhow::Result<Option<GammaEvent>> {
        let url = format!("{}/events", self.config.base_url);

        tracing::debug!(slug = %slug, "Fetching cycle event from Gamma API");

        let response = self.client.get(&url).query(&[("slug", slug)]).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error: {} - {}", status, body);
        }

        let mut events: Vec<GammaEvent> = response.json().await?;
        Ok(if events.is_empty() {
            None
        } else {
            Some(events.remove(0))
        })
    }
}

#[async_trait]
impl MarketResolver for GammaClient {
    async fn resolve(&self, slug: &str) -> anyhow::Result<Option<CycleMarket>> {
        let Some(event) = self.fetch_event(slug).await? else {
            return Ok(None);
        };

        let Some(market) = event.markets.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };

        let token_ids = parse_token_ids(market.clob_token_ids.as_deref());
        if token_ids.len() < 2 {
            tracing::warn!(slug = %slug, "Cycle market has fewer than two outcome tokens");
            return Ok(None);
        }

        Ok(Some(CycleMarket {
            token_ids,
            title: event.title,
            condition_id: market.condition_id.filter(|c| !c.is_empty()),
        }))
    }
}

/// Event response from Gamma (one per cycle slug).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaEvent {
    /// Event title, e.g. "Bitcoin Up or Down - 3:05 PM ET"
    title: Option<String>,
    /// Markets within this event (cycle events carry exactly one)
    markets: Option<Vec<GammaMarket>>,
}

/// Market entry within an event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: Option<String>,
    /// CLOB token IDs as a JSON string, e.g. "[\"tok1\", \"tok2\"]"
    clob_token_ids: Option<String>,
}

/// Parse the CLOB token id list from its JSON-string encoding.
fn parse_token_ids(token_ids_str: Option<&str>) -> Vec<String> {
    let Some(raw) = token_ids_str else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_default()
}
