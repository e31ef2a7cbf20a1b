//! Strategy model
//!
//! A strategy is a recurring trading rule over a cycle-market series: inside
//! a time window of every cycle, buy one outcome once if its best bid enters
//! the configured price band. Strategies are owned by external configuration
//! management; the core only reads them through [`StrategyStore`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How the invested amount is computed at trigger time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountMode {
    /// Fraction of available balance (0.10 = 10%).
    Ratio,
    /// Fixed USDC amount.
    Fixed,
}

/// Optional floor on the underlying candle spread before a trigger may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadMode {
    /// No spread gating.
    #[default]
    None,
    /// Fixed minimum `|close - open|`.
    Fixed,
    /// Base spread derived from recent candles, decayed across the window.
    Auto,
}

/// A recurring cycle-market trading rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub account_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// Slug template of the market series; the per-cycle slug is
    /// `template-periodStart`.
    pub slug_template: String,
    /// Cycle length in seconds (300 or 900).
    pub interval_seconds: u32,
    /// Trade window start, measured from cycle start.
    pub window_start_seconds: u32,
    /// Trade window end, measured from cycle start.
    pub window_end_seconds: u32,
    /// Lower bound of the triggering best-bid band.
    pub min_price: Decimal,
    /// Upper bound of the triggering best-bid band.
    pub max_price: Decimal,
    pub amount_mode: AmountMode,
    /// Fraction for [`AmountMode::Ratio`], USDC for [`AmountMode::Fixed`].
    pub amount_value: Decimal,
    #[serde(default)]
    pub spread_mode: SpreadMode,
    #[serde(default)]
    pub min_spread: Option<Decimal>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Strategy {
    /// Validate the window and band invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            anyhow::bail!("strategy {}: interval_seconds must be positive", self.id);
        }
        if self.window_start_seconds > self.window_end_seconds
            || self.window_end_seconds > self.interval_seconds
        {
            anyhow::bail!(
                "strategy {}: window [{}, {}] must satisfy 0 <= start <= end <= interval {}",
                self.id,
                self.window_start_seconds,
                self.window_end_seconds,
                self.interval_seconds
            );
        }
        if self.min_price < Decimal::ZERO
            || self.max_price > Decimal::ONE
            || self.min_price > self.max_price
        {
            anyhow::bail!(
                "strategy {}: price band [{}, {}] must lie within [0, 1]",
                self.id,
                self.min_price,
                self.max_price
            );
        }
        if self.amount_value <= Decimal::ZERO {
            anyhow::bail!("strategy {}: amount_value must be positive", self.id);
        }
        Ok(())
    }

    /// Display name, falling back to the slug template.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.slug_template)
    }
}

/// Read access to externally managed strategies.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// All currently enabled strategies.
    async fn enabled(&self) -> anyhow::Result<Vec<Strategy>>;
    /// Look up one strategy by id, enabled or not.
    async fn get(&self, id: i64) -> anyhow::Result<Option<Strategy>>;
}

/// Baseline strategy for tests: 5-minute cycles, full window, open band,
/// 10% ratio sizing.
#[cfg(test)]
pub fn test_strategy(id: i64) -> Strategy {
    use rust_decimal_macros::dec;

    Strategy {
        id,
        account_id: 1,
        name: None,
        slug_template: "btc-updown-5m".to_string(),
        interval_seconds: 300,
        window_start_seconds: 0,
        window_end_seconds: 300,
        min_price: dec!(0),
        max_price: dec!(1),
        amount_mode: AmountMode::Ratio,
        amount_value: dec!(0.10),
        spread_mode: SpreadMode::None,
        min_spread: None,
        enabled: true,
    }
}
