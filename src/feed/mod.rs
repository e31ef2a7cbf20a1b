//! Underlying-price candle feed
//!
//! The spread gate compares the current cycle's candle move `|close - open|`
//! against a floor. Candles come from the underlying spot exchange; the
//! trait keeps the engine testable without it.

mod kline;

pub use kline::{BinanceKlines, KlineConfig};

use async_trait::async_trait;
use rust_decimal::Decimal;

/// One OHLC candle aligned to a cycle.
#[derive(Debug, Clone, Copy)]
pub struct Candle {
    pub open: Decimal,
    pub close: Decimal,
}

impl Candle {
    /// Absolute open-to-close move.
    pub fn spread(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    /// True when the candle moves in the direction of the outcome index
    /// (0 = up, 1 = down).
    pub fn matches_outcome(&self, outcome_index: usize) -> bool {
        match outcome_index {
            0 => self.close > self.open,
            1 => self.close < self.open,
            _ => false,
        }
    }
}

/// Source of interval-aligned candles for the underlying.
#[async_trait]
pub trait CandleFeed: Send + Sync {
    /// Candle for the cycle starting at `period_start`. `Ok(None)` when the
    /// exchange has no data for that window yet.
    async fn current_candle(
        &self,
        interval_seconds: u32,
        period_start: i64,
    ) -> anyhow::Result<Option<Candle>>;

    /// Recent closed candles before `period_start`, newest last. Used to
    /// derive the auto-mode base spread.
    async fn recent_candles(
        &self,
        interval_seconds: u32,
        period_start: i64,
        count: u32,
    ) -> anyhow::Result<Vec<Candle>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_candle_spread() {
        let up = Candle {
            open: dec!(100),
            close: dec!(103.5),
        };
        assert_eq!(up.spread(), dec!(3.5));

        let down = Candle {
            open: dec!(100),
            close: dec!(99.25),
        };
        assert_eq!(down.spread(), dec!(0.75));
    }

    #[test]
    fn test_candle_outcome_direction() {
        let up = Candle {
            open: dec!(100),
            close: dec!(101),
        };
        assert!(up.matches_outcome(0));
        assert!(!up.matches_outcome(1));

        let down = Candle {
            open: dec!(100),
            close: dec!(99),
        };
        assert!(down.matches_outcome(1));
        assert!(!down.matches_outcome(0));

        let flat = Candle {
            open: dec!(100),
            close: dec!(100),
        };
        assert!(!flat.matches_outcome(0));
        assert!(!flat.matches_outcome(1));
    }
}
