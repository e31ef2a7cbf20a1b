//! Minimum-spread gate
//!
//! Optional floor on the underlying candle move before a trigger may fire:
//! a thin candle near the strike makes the tail entry a coin flip, so the
//! gate skips the cycle (silently, no fail trigger). `auto` mode derives the
//! floor from recent candles moving in the candidate direction and relaxes
//! it linearly from 100% to 50% as the trade window elapses.

use crate::cycle;
use crate::feed::CandleFeed;
use crate::strategy::{SpreadMode, Strategy};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub struct SpreadGate {
    feed: Arc<dyn CandleFeed>,
    /// Candles inspected for the auto-mode base spread.
    lookback: u32,
}

impl SpreadGate {
    pub fn new(feed: Arc<dyn CandleFeed>, lookback: u32) -> Self {
        Self { feed, lookback }
    }

    /// Whether the candidate passes the strategy's spread gate at `now`.
    pub async fn pass(
        &self,
        strategy: &Strategy,
        period_start: i64,
        outcome_index: usize,
        now: i64,
    ) -> bool {
        if strategy.spread_mode == SpreadMode::None {
            return true;
        }

        let candle = match self
            .feed
            .current_candle(strategy.interval_seconds, period_start)
            .await
        {
            Ok(Some(candle)) => candle,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(strategy_id = strategy.id, error = %e, "Candle fetch failed, spread gate closed");
                return false;
            }
        };
        let spread = candle.spread();

        match strategy.spread_mode {
            SpreadMode::None => true,
            SpreadMode::Fixed => match strategy.min_spread.filter(|m| *m > Decimal::ZERO) {
                Some(min_spread) => spread >= min_spread,
                None => true,
            },
            SpreadMode::Auto => {
                let Some(base) = self.auto_base(strategy, period_start, outcome_index).await
                else {
                    return true;
                };
                let (window_start, window_end) = cycle::window_bounds(strategy, period_start);
                let effective = base * auto_coefficient(window_start, window_end, now);
                if effective <= Decimal::ZERO {
                    return true;
                }
                spread >= effective
            }
        }
    }

    /// Largest recent candle move in the candidate outcome's direction.
    async fn auto_base(
        &self,
        strategy: &Strategy,
        period_start: i64,
        outcome_index: usize,
    ) -> Option<Decimal> {
        let candles = match self
            .feed
            .recent_candles(strategy.interval_seconds, period_start, self.lookback)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                tracing::debug!(strategy_id = strategy.id, error = %e, "Auto spread base unavailable");
                return None;
            }
        };

        candles
            .iter()
            .filter(|c| c.matches_outcome(outcome_index))
            .map(|c| c.spread())
            .max()
            .filter(|base| *base > Decimal::ZERO)
    }
}

/// Decay coefficient across the window: 1.0 at window start down to 0.5 at
/// window end, clamped outside.
pub fn auto_coefficient(window_start: i64, window_end: i64, now: i64) -> Decimal {
    let window_len = window_end - window_start;
    if window_len <= 0 {
        return Decimal::ONE;
    }
    let elapsed = (now - window_start).clamp(0, window_len);
    let progress = Decimal::from(elapsed) / Decimal::from(window_len);
    Decimal::ONE - progress * dec!(0.5)
}
