//! Configuration types for poly-tail

use crate::account::Credentials;
use crate::engine::EngineConfig;
use crate::settle::SettlementConfig;
use crate::strategy::Strategy;
use crate::watch::WatcherConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub watcher: WatcherSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub settlement: SettlementSection,
    #[serde(default)]
    pub venue: VenueSection,
    #[serde(default)]
    pub feed: FeedSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    /// Decrypted account credential bundles.
    #[serde(default)]
    pub accounts: Vec<Credentials>,
    /// Strategies for the memory store backend. Ignored with Postgres,
    /// where strategies live in the database.
    #[serde(default)]
    pub strategies: Vec<Strategy>,
}

/// Storage backend selection
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

/// Order-book watcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSection {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_resubscribe_grace_secs")]
    pub resubscribe_grace_secs: u64,
    /// How often the strategy set is re-read to detect changes.
    #[serde(default = "default_strategy_refresh_secs")]
    pub strategy_refresh_secs: u64,
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}
fn default_reconnect_delay_secs() -> u64 {
    10
}
fn default_resubscribe_grace_secs() -> u64 {
    2
}
fn default_strategy_refresh_secs() -> u64 {
    30
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            resubscribe_grace_secs: default_resubscribe_grace_secs(),
            strategy_refresh_secs: default_strategy_refresh_secs(),
        }
    }
}

/// Trigger engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Fixed limit price triggers buy at (the aggressive cap, not the
    /// observed best bid).
    #[serde(default = "default_target_price")]
    pub target_price: Decimal,
    #[serde(default = "default_min_amount")]
    pub min_amount: Decimal,
    #[serde(default = "default_size_decimals")]
    pub size_decimals: u32,
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_fill_check_delay_ms")]
    pub fill_check_delay_ms: u64,
    #[serde(default = "default_spread_lookback")]
    pub spread_lookback: u32,
}

fn default_target_price() -> Decimal {
    Decimal::new(99, 2) // 0.99
}
fn default_min_amount() -> Decimal {
    Decimal::ONE
}
fn default_size_decimals() -> u32 {
    2
}
fn default_max_submit_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_fill_check_delay_ms() -> u64 {
    1000
}
fn default_spread_lookback() -> u32 {
    24
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            target_price: default_target_price(),
            min_amount: default_min_amount(),
            size_decimals: default_size_decimals(),
            max_submit_attempts: default_max_submit_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            fill_check_delay_ms: default_fill_check_delay_ms(),
            spread_lookback: default_spread_lookback(),
        }
    }
}

/// Settlement reconciler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementSection {
    #[serde(default = "default_settle_poll_secs")]
    pub poll_interval_secs: u64,
}

fn default_settle_poll_secs() -> u64 {
    10
}

impl Default for SettlementSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_settle_poll_secs(),
        }
    }
}

/// Venue endpoints and chain parameters
#[derive(Debug, Clone, Deserialize)]
pub struct VenueSection {
    #[serde(default = "default_clob_url")]
    pub clob_url: String,
    #[serde(default = "default_gamma_url")]
    pub gamma_url: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_ctf_address")]
    pub ctf_address: String,
    #[serde(default = "default_exchange_address")]
    pub exchange_address: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}
fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}
fn default_rpc_url() -> String {
    "https://polygon-rpc.com".to_string()
}
fn default_ctf_address() -> String {
    crate::venue::DEFAULT_CTF_ADDRESS.to_string()
}
fn default_exchange_address() -> String {
    crate::venue::DEFAULT_EXCHANGE.to_string()
}
fn default_chain_id() -> u64 {
    137
}
fn default_timeout_secs() -> u64 {
    10
}

impl Default for VenueSection {
    fn default() -> Self {
        Self {
            clob_url: default_clob_url(),
            gamma_url: default_gamma_url(),
            rpc_url: default_rpc_url(),
            ctf_address: default_ctf_address(),
            exchange_address: default_exchange_address(),
            chain_id: default_chain_id(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Underlying candle feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    #[serde(default = "default_binance_url")]
    pub binance_url: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
}

fn default_binance_url() -> String {
    "https://api.binance.com".to_string()
}
fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            binance_url: default_binance_url(),
            symbol: default_symbol(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySection {
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_metrics_port() -> u16 {
    9090
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("cannot read config {}: {}", path.as_ref().display(), e)
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            anyhow::bail!("store.backend = \"postgres\" requires store.database_url");
        }
        for strategy in &self.strategies {
            strategy.validate()?;
            if !self.accounts.iter().any(|a| a.id == strategy.account_id) {
                anyhow::bail!(
                    "strategy {} references unknown account {}",
                    strategy.id,
                    strategy.account_id
                );
            }
        }
        Ok(())
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            ws_url: self.watcher.ws_url.clone(),
            reconnect_delay: Duration::from_secs(self.watcher.reconnect_delay_secs),
            resubscribe_grace: Duration::from_secs(self.watcher.resubscribe_grace_secs),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            target_price: self.engine.target_price,
            min_amount: self.engine.min_amount,
            size_decimals: self.engine.size_decimals,
            max_submit_attempts: self.engine.max_submit_attempts,
            retry_delay: Duration::from_millis(self.engine.retry_delay_ms),
            fill_check_delay: Duration::from_millis(self.engine.fill_check_delay_ms),
            spread_lookback: self.engine.spread_lookback,
        }
    }

    pub fn settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            poll_interval: Duration::from_secs(self.settlement.poll_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FULL_CONFIG: &str = r#"
        [store]
        backend = "memory"

        [watcher]
        ws_url = "wss://ws-subscriptions-clob.polymarket.com/ws/market"
        reconnect_delay_secs = 10
        strategy_refresh_secs = 15

        [engine]
        target_price = 0.99
        min_amount = 1.0
        max_submit_attempts = 3

        [settlement]
        poll_interval_secs = 10

        [feed]
        symbol = "BTCUSDT"

        [telemetry]
        metrics_port = 9090
        log_level = "info"

        [[accounts]]
        id = 1
        address = "0x00000000000000000000000000000000000000a1"
        proxy_address = "0x00000000000000000000000000000000000000b2"
        api_key = "key"
        api_secret = "c2VjcmV0"
        api_passphrase = "pass"
        private_key = "0x0000000000000000000000000000000000000000000000000000000000000001"
        wallet_type = "proxy"

        [[strategies]]
        id = 1
        account_id = 1
        slug_template = "btc-updown-5m"
        interval_seconds = 300
        window_start_seconds = 240
        window_end_seconds = 295
        min_price = 0.95
        max_price = 0.99
        amount_mode = "ratio"
        amount_value = 0.10
    "#;

    #[test]
    fn test_config_deserialize() {
        let config: Config = toml::from_str(FULL_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.watcher.strategy_refresh_secs, 15);
        assert_eq!(config.engine.target_price, dec!(0.99));
        assert_eq!(config.strategies.len(), 1);
        assert_eq!(config.accounts.len(), 1);
        // defaults fill the omitted knobs
        assert_eq!(config.engine.retry_delay_ms, 500);
        assert_eq!(config.venue.chain_id, 137);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.settlement.poll_interval_secs, 10);
        assert!(config.strategies.is_empty());
    }

    #[test]
    fn test_postgres_requires_url() {
        let config: Config = toml::from_str(
            r#"
            [store]
            backend = "postgres"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_with_unknown_account_rejected() {
        let mut config: Config = toml::from_str(FULL_CONFIG).unwrap();
        config.strategies[0].account_id = 42;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_section_conversions() {
        let config: Config = toml::from_str(FULL_CONFIG).unwrap();
        assert_eq!(
            config.watcher_config().reconnect_delay,
            Duration::from_secs(10)
        );
        assert_eq!(
            config.engine_config().fill_check_delay,
            Duration::from_millis(1000)
        );
        assert_eq!(
            config.settlement_config().poll_interval,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }
}
