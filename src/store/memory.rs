//! In-memory store implementations

use crate::strategy::{Strategy, StrategyStore};
use crate::trigger::{NewTrigger, Resolution, Trigger, TriggerStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Strategy store over a fixed in-memory set (config-file mode).
pub struct MemoryStrategyStore {
    strategies: Arc<RwLock<Vec<Strategy>>>,
}

impl MemoryStrategyStore {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies: Arc::new(RwLock::new(strategies)),
        }
    }

    /// Replace the strategy set (used by tests to simulate config changes).
    pub async fn replace(&self, strategies: Vec<Strategy>) {
        *self.strategies.write().await = strategies;
    }
}

#[async_trait]
impl StrategyStore for MemoryStrategyStore {
    async fn enabled(&self) -> anyhow::Result<Vec<Strategy>> {
        let strategies = self.strategies.read().await;
        Ok(strategies.iter().filter(|s| s.enabled).cloned().collect())
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<Strategy>> {
        let strategies = self.strategies.read().await;
        Ok(strategies.iter().find(|s| s.id == id).cloned())
    }
}

/// Trigger store over a keyed in-memory map. Enforces the same
/// one-row-per-cycle and resolve-once semantics as the Postgres store.
#[derive(Default)]
pub struct MemoryTriggerStore {
    by_cycle: Arc<RwLock<HashMap<(i64, i64), Trigger>>>,
}

impl MemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows, unordered (test inspection).
    pub async fn all(&self) -> Vec<Trigger> {
        self.by_cycle.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn insert(&self, trigger: NewTrigger) -> anyhow::Result<Option<Trigger>> {
        let key = (trigger.strategy_id, trigger.period_start);
        let mut map = self.by_cycle.write().await;
        if map.contains_key(&key) {
            return Ok(None);
        }
        let row = trigger.into_trigger();
        map.insert(key, row.clone());
        Ok(Some(row))
    }

    async fn find_by_cycle(
        &self,
        strategy_id: i64,
        period_start: i64,
    ) -> anyhow::Result<Option<Trigger>> {
        let map = self.by_cycle.read().await;
        Ok(map.get(&(strategy_id, period_start)).cloned())
    }

    async fn unresolved_successes(&self) -> anyhow::Result<Vec<Trigger>> {
        let map = self.by_cycle.read().await;
        let mut pending: Vec<Trigger> = map
            .values()
            .filter(|t| {
                t.status == crate::trigger::TriggerStatus::Success
                    && !t.resolved
                    && t.order_id.is_some()
            })
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        Ok(pending)
    }

    async fn set_condition_id(&self, id: Uuid, condition_id: &str) -> anyhow::Result<()> {
        let mut map = self.by_cycle.write().await;
        if let Some(trigger) = map.values_mut().find(|t| t.id == id) {
            trigger.condition_id = Some(condition_id.to_string());
        }
        Ok(())
    }

    async fn mark_resolved(&self, id: Uuid, resolution: Resolution) -> anyhow::Result<bool> {
        let mut map = self.by_cycle.write().await;
        let Some(trigger) = map.values_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        if trigger.resolved {
            return Ok(false);
        }
        trigger.resolved = true;
        trigger.winner_outcome_index = Some(resolution.winner_outcome_index);
        trigger.realized_pnl = Some(resolution.realized_pnl);
        trigger.settled_at = Some(resolution.settled_at);
        if let Some(price) = resolution.trigger_price {
            trigger.trigger_price = price;
        }
        if let Some(amount) = resolution.amount {
            trigger.amount = amount;
        }
        Ok(true)
    }
}
