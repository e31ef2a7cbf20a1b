//! Per-cycle execution context
//!
//! Everything the trigger path needs that can be prepared before the price
//! condition fires: account credentials, per-token fee rates, and (for
//! fixed-amount strategies) pre-signed orders for both outcomes. Built at
//! most once per cycle; a racing double-build wastes work but produces an
//! equivalent context, and actual submission stays gated by the cycle lock.

use crate::account::{AccountProvider, Credentials};
use crate::cycle::{self, CycleKey};
use crate::strategy::{AmountMode, Strategy};
use crate::venue::{OrderArgs, OrderClient, OrderSigner, Side, SignedOrder};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Prepared per-cycle state.
pub struct PeriodContext {
    pub credentials: Credentials,
    pub fee_rate_by_token: HashMap<String, Decimal>,
    pub token_ids: Vec<String>,
    pub market_title: Option<String>,
    pub period_start: i64,
    pub expires_at: i64,
    /// Pre-signed order per outcome index (fixed-amount mode only).
    pub presigned: Vec<Option<SignedOrder>>,
}

/// Cycle-keyed context cache with lazy expiry.
#[derive(Default)]
pub struct ContextCache {
    cache: DashMap<CycleKey, Arc<PeriodContext>>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached context for the cycle, evicting it if the cycle has ended.
    pub fn get_live(&self, key: CycleKey, now: i64) -> Option<Arc<PeriodContext>> {
        let context = self.cache.get(&key).map(|entry| entry.clone())?;
        if context.expires_at <= now {
            self.cache.remove(&key);
            return None;
        }
        Some(context)
    }

    /// Get or build the context for a cycle.
    ///
    /// `size_for_fixed` is the pre-computable order size for fixed-amount
    /// strategies (`None` skips pre-signing). Failures return the reason
    /// that should land on the fail trigger.
    #[allow(clippy::too_many_arguments)]
    pub async fn ensure(
        &self,
        strategy: &Strategy,
        period_start: i64,
        token_ids: &[String],
        market_title: Option<&str>,
        now: i64,
        size_for_fixed: Option<Decimal>,
        target_price: Decimal,
        accounts: &dyn AccountProvider,
        orders: &dyn OrderClient,
        signer: &dyn OrderSigner,
    ) -> Result<Arc<PeriodContext>, String> {
        let key = CycleKey::new(strategy.id, period_start);
        if let Some(context) = self.get_live(key, now) {
            return Ok(context);
        }

        let Some(credentials) = accounts.credentials(strategy.account_id) else {
            return Err(format!("account {} credentials unavailable", strategy.account_id));
        };

        let mut fee_rate_by_token = HashMap::with_capacity(token_ids.len());
        for token_id in token_ids {
            let fee_rate = match orders.fee_rate_bps(token_id).await {
                Ok(rate) => rate,
                Err(e) => {
                    tracing::warn!(
                        strategy_id = strategy.id,
                        token_id = %token_id,
                        error = %e,
                        "Fee rate lookup failed, assuming zero"
                    );
                    Decimal::ZERO
                }
            };
            fee_rate_by_token.insert(token_id.clone(), fee_rate);
        }

        let mut presigned: Vec<Option<SignedOrder>> = vec![None; token_ids.len()];
        if strategy.amount_mode == AmountMode::Fixed {
            if let Some(size) = size_for_fixed {
                for (outcome_index, token_id) in token_ids.iter().enumerate() {
                    let args = OrderArgs {
                        token_id: token_id.clone(),
                        side: Side::Buy,
                        price: target_price,
                        size,
                        fee_rate_bps: fee_rate_by_token
                            .get(token_id)
                            .copied()
                            .unwrap_or_default(),
                    };
                    match signer.sign(&credentials, &args).await {
                        Ok(order) => presigned[outcome_index] = Some(order),
                        Err(e) => {
                            tracing::warn!(
                                strategy_id = strategy.id,
                                outcome_index,
                                error = %e,
                                "Pre-signing failed, will sign at trigger time"
                            );
                        }
                    }
                }
            }
        }

        let context = Arc::new(PeriodContext {
            credentials,
            fee_rate_by_token,
            token_ids: token_ids.to_vec(),
            market_title: market_title.map(str::to_string),
            period_start,
            expires_at: cycle::period_end(period_start, strategy.interval_seconds),
            presigned,
        });
        self.cache.insert(key, context.clone());
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_credentials;

    fn context(period_start: i64, expires_at: i64) -> Arc<PeriodContext> {
        Arc::new(PeriodContext {
            credentials: test_credentials(1),
            fee_rate_by_token: HashMap::new(),
            token_ids: vec![],
            market_title: None,
            period_start,
            expires_at,
            presigned: vec![],
        })
    }

    #[test]
    fn test_get_live_evicts_expired_cycle() {
        let cache = ContextCache::new();
        let key = CycleKey::new(1, 1_000_000);
        cache.cache.insert(key, context(1_000_000, 1_000_300));

        assert!(cache.get_live(key, 1_000_100).is_some());
        // first access at or past cycle end drops the entry
        assert!(cache.get_live(key, 1_000_300).is_none());
        assert!(cache.cache.is_empty());
    }

    #[test]
    fn test_get_live_miss() {
        let cache = ContextCache::new();
        assert!(cache.get_live(CycleKey::new(9, 0), 10).is_none());
    }
}
