//! Binance klines REST client

use super::{Candle, CandleFeed};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// Binance REST base URL
const BINANCE_API_URL: &str = "https://api.binance.com";

#[derive(Debug, Clone)]
pub struct KlineConfig {
    pub base_url: String,
    /// Spot symbol the cycle markets settle against, e.g. "BTCUSDT".
    pub symbol: String,
    pub timeout: Duration,
}

impl Default for KlineConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_API_URL.to_string(),
            symbol: "BTCUSDT".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Candle feed backed by the Binance klines endpoint.
pub struct BinanceKlines {
    config: KlineConfig,
    client: Client,
}

impl BinanceKlines {
    pub fn new(config: KlineConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn fetch(
        &self,
        interval_seconds: u32,
        start_time_ms: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", self.config.symbol.as_str()),
                ("interval", interval_name(interval_seconds)?),
                ("startTime", &start_time_ms.to_string()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("klines query failed: HTTP {}", response.status());
        }

        let rows: Vec<serde_json::Value> = response.json().await?;
        Ok(rows.iter().filter_map(parse_kline_row).collect())
    }
}

#[async_trait]
impl CandleFeed for BinanceKlines {
    async fn current_candle(
        &self,
        interval_seconds: u32,
        period_start: i64,
    ) -> anyhow::Result<Option<Candle>> {
        let candles = self.fetch(interval_seconds, period_start * 1000, 1).await?;
        Ok(candles.into_iter().next())
    }

    async fn recent_candles(
        &self,
        interval_seconds: u32,
        period_start: i64,
        count: u32,
    ) -> anyhow::Result<Vec<Candle>> {
        let span = i64::from(interval_seconds) * i64::from(count);
        let start_ms = (period_start - span) * 1000;
        self.fetch(interval_seconds, start_ms, count).await
    }
}

/// Binance interval name for a cycle length.
fn interval_name(interval_seconds: u32) -> anyhow::Result<&'static str> {
    match interval_seconds {
        60 => Ok("1m"),
        300 => Ok("5m"),
        900 => Ok("15m"),
        3600 => Ok("1h"),
        other => anyhow::bail!("unsupported candle interval: {}s", other),
    }
}

/// Kline rows are arrays: `[openTime, open, high, low, close, ...]`.
fn parse_kline_row(row: &serde_json::Value) -> Option<Candle> {
    let fields = row.as_array()?;
    let open = Decimal::from_str(fields.get(1)?.as_str()?).ok()?;
    let close = Decimal::from_str(fields.get(4)?.as_str()?).ok()?;
    Some(Candle { open, close })
}
