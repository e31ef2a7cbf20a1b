//! Settlement reconciliation
//!
//! Periodic sweep over successful, unresolved triggers: resolve the cycle's
//! on-chain condition, read the payout vector once the market settled,
//! compute realized P&L (preferring the order's actual fill) and mark the
//! trigger resolved exactly once. Per-trigger failures are logged and picked
//! up again on the next sweep; they never block other triggers.

use crate::account::AccountProvider;
use crate::cycle;
use crate::market::MarketResolver;
use crate::strategy::StrategyStore;
use crate::trigger::{Resolution, Trigger, TriggerStore};
use crate::venue::{ConditionOracle, OrderClient};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Sweep period, independent of cycle timing.
    pub poll_interval: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

pub struct SettlementDeps {
    pub triggers: Arc<dyn TriggerStore>,
    pub strategies: Arc<dyn StrategyStore>,
    pub resolver: Arc<dyn MarketResolver>,
    pub oracle: Arc<dyn ConditionOracle>,
    pub orders: Arc<dyn OrderClient>,
    pub accounts: Arc<dyn AccountProvider>,
}

pub struct SettlementReconciler {
    config: SettlementConfig,
    deps: SettlementDeps,
}

impl SettlementReconciler {
    pub fn new(config: SettlementConfig, deps: SettlementDeps) -> Self {
        Self { config, deps }
    }

    /// Sweep forever on the configured period. Sweeps run back to back, so
    /// a slow sweep delays the next tick instead of overlapping it.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(settled) if settled > 0 => {
                    tracing::info!(settled, "Settlement sweep complete");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Settlement sweep failed"),
            }
        }
    }

    /// One pass over the unresolved backlog. Returns how many triggers were
    /// newly resolved.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let pending = self.deps.triggers.unresolved_successes().await?;
        metrics::gauge!("polytail_unresolved_triggers").set(pending.len() as f64);
        if pending.is_empty() {
            return Ok(0);
        }

        let mut settled = 0;
        for trigger in &pending {
            match self.settle_one(trigger).await {
                Ok(true) => {
                    settled += 1;
                    metrics::counter!("polytail_settlements_total").increment(1);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        trigger_id = %trigger.id,
                        strategy_id = trigger.strategy_id,
                        error = %e,
                        "Settlement deferred to next sweep"
                    );
                }
            }
        }
        Ok(settled)
    }

    /// Settle one trigger if its condition has resolved on-chain.
    async fn settle_one(&self, trigger: &Trigger) -> anyhow::Result<bool> {
        if trigger.resolved {
            return Ok(false);
        }
        let Some(strategy) = self.deps.strategies.get(trigger.strategy_id).await? else {
            tracing::debug!(
                trigger_id = %trigger.id,
                strategy_id = trigger.strategy_id,
                "Strategy gone, leaving trigger unresolved"
            );
            return Ok(false);
        };

        let Some(condition_id) = self.condition_id(trigger, &strategy.slug_template).await? else {
            return Ok(false);
        };

        let Some(payouts) = self.deps.oracle.payouts(&condition_id).await? else {
            // not resolved on-chain yet; next sweep retries
            return Ok(false);
        };
        let Some(winner_outcome_index) = payouts.iter().position(|p| *p == Decimal::ONE) else {
            tracing::debug!(
                trigger_id = %trigger.id,
                ?payouts,
                "Payout vector has no unit winner yet"
            );
            return Ok(false);
        };

        let won = trigger.outcome_index == winner_outcome_index;
        let fill = self.query_fill(trigger, strategy.account_id).await;

        let (realized_pnl, fill_price, fill_amount) = match fill {
            Some(fill) => {
                let cost = (fill.price * fill.size_matched).round_dp(8);
                let pnl = if won {
                    (fill.size_matched - cost).round_dp(8)
                } else {
                    -cost
                };
                (pnl, Some(fill.price), Some(cost))
            }
            None => (pnl_from_recorded(trigger, won), None, None),
        };

        let resolved = self
            .deps
            .triggers
            .mark_resolved(
                trigger.id,
                Resolution {
                    winner_outcome_index,
                    realized_pnl,
                    settled_at: Utc::now(),
                    trigger_price: fill_price,
                    amount: fill_amount,
                },
            )
            .await?;

        if resolved {
            tracing::info!(
                trigger_id = %trigger.id,
                strategy_id = trigger.strategy_id,
                period_start = trigger.period_start,
                winner_outcome_index,
                won,
                realized_pnl = %realized_pnl,
                "Trigger settled"
            );
        }
        Ok(resolved)
    }

    /// The trigger's condition id, resolving and caching it on first need.
    async fn condition_id(
        &self,
        trigger: &Trigger,
        slug_template: &str,
    ) -> anyhow::Result<Option<String>> {
        if let Some(condition_id) = &trigger.condition_id {
            return Ok(Some(condition_id.clone()));
        }

        let slug = cycle::market_slug(slug_template, trigger.period_start);
        let Some(market) = self.deps.resolver.resolve(&slug).await? else {
            return Ok(None);
        };
        let Some(condition_id) = market.condition_id else {
            return Ok(None);
        };
        self.deps
            .triggers
            .set_condition_id(trigger.id, &condition_id)
            .await?;
        Ok(Some(condition_id))
    }

    /// Usable fill for the trigger's order, or `None` when the query fails
    /// or reports nothing.
    async fn query_fill(
        &self,
        trigger: &Trigger,
        account_id: i64,
    ) -> Option<crate::venue::OrderFill> {
        let order_id = trigger.order_id.as_deref()?;
        let credentials = self.deps.accounts.credentials(account_id)?;
        match self.deps.orders.order_fill(&credentials, order_id).await {
            Ok(Some(fill)) if fill.is_usable() => Some(fill),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(
                    trigger_id = %trigger.id,
                    error = %e,
                    "Fill query failed, falling back to recorded values"
                );
                None
            }
        }
    }
}

/// Fallback P&L from the trigger's recorded price and amount, same shape as
/// the fill-based formula: won `amount/price - amount`, lost `-amount`.
fn pnl_from_recorded(trigger: &Trigger, won: bool) -> Decimal {
    if !won {
        return (-trigger.amount).round_dp(8);
    }
    if trigger.trigger_price <= Decimal::ZERO {
        tracing::warn!(trigger_id = %trigger.id, "Recorded trigger price unusable, P&L set to zero");
        return Decimal::ZERO;
    }
    (trigger.amount / trigger.trigger_price - trigger.amount).round_dp(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{test_credentials, Credentials};
    use crate::market::CycleMarket;
    use crate::store::{MemoryStrategyStore, MemoryTriggerStore};
    use crate::strategy::test_strategy;
    use crate::trigger::{NewTrigger, TriggerStatus};
    use crate::venue::{OrderAck, OrderFill, SignedOrder};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct StaticAccounts;

    impl AccountProvider for StaticAccounts {
        fn credentials(&self, _account_id: i64) -> Option<Credentials> {
            Some(test_credentials(1))
        }
    }

    struct StaticOracle(Option<Vec<Decimal>>);

    #[async_trait]
    impl ConditionOracle for StaticOracle {
        async fn payouts(&self, _condition_id: &str) -> anyhow::Result<Option<Vec<Decimal>>> {
            Ok(self.0.clone())
        }
    }

    struct ConditionResolver;

    #[async_trait]
    impl MarketResolver for ConditionResolver {
        async fn resolve(&self, _slug: &str) -> anyhow::Result<Option<CycleMarket>> {
            Ok(Some(CycleMarket {
                token_ids: vec!["a".to_string(), "b".to_string()],
                title: None,
                condition_id: Some("0xc1".to_string()),
            }))
        }
    }

    struct FillOrders(Option<OrderFill>);

    #[async_trait]
    impl OrderClient for FillOrders {
        async fn submit(
            &self,
            _creds: &Credentials,
            _order: &SignedOrder,
        ) -> anyhow::Result<OrderAck> {
            anyhow::bail!("not used")
        }

        async fn order_fill(
            &self,
            _creds: &Credentials,
            _order_id: &str,
        ) -> anyhow::Result<Option<OrderFill>> {
            Ok(self.0)
        }

        async fn fee_rate_bps(&self, _token_id: &str) -> anyhow::Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    struct Harness {
        reconciler: SettlementReconciler,
        triggers: Arc<MemoryTriggerStore>,
    }

    fn harness(payouts: Option<Vec<Decimal>>, fill: Option<OrderFill>) -> Harness {
        let triggers = Arc::new(MemoryTriggerStore::new());
        let reconciler = SettlementReconciler::new(
            SettlementConfig::default(),
            SettlementDeps {
                triggers: triggers.clone(),
                strategies: Arc::new(MemoryStrategyStore::new(vec![test_strategy(1)])),
                resolver: Arc::new(ConditionResolver),
                oracle: Arc::new(StaticOracle(payouts)),
                orders: Arc::new(FillOrders(fill)),
                accounts: Arc::new(StaticAccounts),
            },
        );
        Harness {
            reconciler,
            triggers,
        }
    }

    async fn seed_trigger(store: &MemoryTriggerStore, outcome_index: usize) -> Trigger {
        store
            .insert(NewTrigger {
                strategy_id: 1,
                period_start: 1_000_000,
                market_title: None,
                outcome_index,
                trigger_price: dec!(0.99),
                amount: dec!(9.9),
                order_id: Some("0xoid".to_string()),
                status: TriggerStatus::Success,
                fail_reason: None,
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_winning_fill_pnl() {
        // payouts [1,0], outcome 0, fill 0.9 x 10 -> pnl = 10 - 9 = 1
        let h = harness(
            Some(vec![dec!(1), dec!(0)]),
            Some(OrderFill {
                price: dec!(0.9),
                size_matched: dec!(10),
            }),
        );
        seed_trigger(&h.triggers, 0).await;

        assert_eq!(h.reconciler.sweep().await.unwrap(), 1);
        let settled = h.triggers.find_by_cycle(1, 1_000_000).await.unwrap().unwrap();
        assert!(settled.resolved);
        assert_eq!(settled.winner_outcome_index, Some(0));
        assert_eq!(settled.realized_pnl, Some(dec!(1.0)));
        // fill refreshes the recorded price and cost
        assert_eq!(settled.trigger_price, dec!(0.9));
        assert_eq!(settled.amount, dec!(9.0));
        assert!(settled.settled_at.is_some());
    }

    #[tokio::test]
    async fn test_losing_fill_pnl() {
        // same payouts, outcome 1 -> pnl = -9
        let h = harness(
            Some(vec![dec!(1), dec!(0)]),
            Some(OrderFill {
                price: dec!(0.9),
                size_matched: dec!(10),
            }),
        );
        seed_trigger(&h.triggers, 1).await;

        assert_eq!(h.reconciler.sweep().await.unwrap(), 1);
        let settled = h.triggers.find_by_cycle(1, 1_000_000).await.unwrap().unwrap();
        assert_eq!(settled.winner_outcome_index, Some(0));
        assert_eq!(settled.realized_pnl, Some(dec!(-9.0)));
    }

    #[tokio::test]
    async fn test_fallback_pnl_without_fill() {
        // no fill data: won pnl = 9.9/0.99 - 9.9 = 0.1, recorded values kept
        let h = harness(Some(vec![dec!(1), dec!(0)]), None);
        seed_trigger(&h.triggers, 0).await;

        assert_eq!(h.reconciler.sweep().await.unwrap(), 1);
        let settled = h.triggers.find_by_cycle(1, 1_000_000).await.unwrap().unwrap();
        assert_eq!(settled.realized_pnl, Some(dec!(0.1)));
        assert_eq!(settled.trigger_price, dec!(0.99));
        assert_eq!(settled.amount, dec!(9.9));
    }

    #[tokio::test]
    async fn test_fallback_pnl_lost_without_fill() {
        let h = harness(Some(vec![dec!(0), dec!(1)]), None);
        seed_trigger(&h.triggers, 0).await;

        h.reconciler.sweep().await.unwrap();
        let settled = h.triggers.find_by_cycle(1, 1_000_000).await.unwrap().unwrap();
        assert_eq!(settled.realized_pnl, Some(dec!(-9.9)));
    }

    #[tokio::test]
    async fn test_unresolved_condition_skips() {
        let h = harness(None, None);
        seed_trigger(&h.triggers, 0).await;

        assert_eq!(h.reconciler.sweep().await.unwrap(), 0);
        let trigger = h.triggers.find_by_cycle(1, 1_000_000).await.unwrap().unwrap();
        assert!(!trigger.resolved);
        // condition id was still resolved and cached for the next sweep
        assert_eq!(trigger.condition_id.as_deref(), Some("0xc1"));
    }

    #[tokio::test]
    async fn test_settlement_idempotent() {
        let h = harness(Some(vec![dec!(1), dec!(0)]), None);
        seed_trigger(&h.triggers, 0).await;

        assert_eq!(h.reconciler.sweep().await.unwrap(), 1);
        // second sweep finds nothing to do
        assert_eq!(h.reconciler.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_degenerate_fill_falls_back() {
        let h = harness(
            Some(vec![dec!(1), dec!(0)]),
            Some(OrderFill {
                price: dec!(0),
                size_matched: dec!(0),
            }),
        );
        seed_trigger(&h.triggers, 0).await;

        h.reconciler.sweep().await.unwrap();
        let settled = h.triggers.find_by_cycle(1, 1_000_000).await.unwrap().unwrap();
        // fallback formula, recorded values untouched
        assert_eq!(settled.realized_pnl, Some(dec!(0.1)));
        assert_eq!(settled.trigger_price, dec!(0.99));
    }

    #[tokio::test]
    async fn test_fractional_payouts_defer() {
        // a 50/50 resolution has no unit winner; leave unresolved
        let h = harness(Some(vec![dec!(0.5), dec!(0.5)]), None);
        seed_trigger(&h.triggers, 0).await;

        assert_eq!(h.reconciler.sweep().await.unwrap(), 0);
        assert!(
            !h.triggers
                .find_by_cycle(1, 1_000_000)
                .await
                .unwrap()
                .unwrap()
                .resolved
        );
    }

    #[test]
    fn test_pnl_from_recorded_guards_zero_price() {
        let mut trigger = NewTrigger {
            strategy_id: 1,
            period_start: 0,
            market_title: None,
            outcome_index: 0,
            trigger_price: dec!(0),
            amount: dec!(10),
            order_id: None,
            status: TriggerStatus::Success,
            fail_reason: None,
        }
        .into_trigger();
        assert_eq!(pnl_from_recorded(&trigger, true), Decimal::ZERO);
        assert_eq!(pnl_from_recorded(&trigger, false), dec!(-10));

        trigger.trigger_price = dec!(0.5);
        assert_eq!(pnl_from_recorded(&trigger, true), dec!(10));
    }
}
