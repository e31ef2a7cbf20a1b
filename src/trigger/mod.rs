//! Trigger records
//!
//! A trigger is the durable record of the one attempted trade of a cycle.
//! At most one exists per `(strategy_id, period_start)`; the engine creates
//! it once and only the settlement reconciler touches it afterwards, writing
//! the resolution fields exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of the trigger attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    Success,
    Fail,
}

impl TriggerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerStatus::Success => "success",
            TriggerStatus::Fail => "fail",
        }
    }
}

/// One attempted trade for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub strategy_id: i64,
    pub period_start: i64,
    pub market_title: Option<String>,
    pub outcome_index: usize,
    /// Best bid that fired the trigger, replaced by the actual fill price
    /// when the fill query succeeds.
    pub trigger_price: Decimal,
    /// Invested USDC, replaced by the actual fill cost when known.
    pub amount: Decimal,
    pub order_id: Option<String>,
    pub status: TriggerStatus,
    pub fail_reason: Option<String>,
    /// On-chain condition id, cached once resolved via market metadata.
    pub condition_id: Option<String>,
    pub resolved: bool,
    pub winner_outcome_index: Option<usize>,
    pub realized_pnl: Option<Decimal>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A trigger row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewTrigger {
    pub strategy_id: i64,
    pub period_start: i64,
    pub market_title: Option<String>,
    pub outcome_index: usize,
    pub trigger_price: Decimal,
    pub amount: Decimal,
    pub order_id: Option<String>,
    pub status: TriggerStatus,
    pub fail_reason: Option<String>,
}

impl NewTrigger {
    pub fn into_trigger(self) -> Trigger {
        Trigger {
            id: Uuid::new_v4(),
            strategy_id: self.strategy_id,
            period_start: self.period_start,
            market_title: self.market_title,
            outcome_index: self.outcome_index,
            trigger_price: self.trigger_price,
            amount: self.amount,
            order_id: self.order_id,
            status: self.status,
            fail_reason: self.fail_reason,
            condition_id: None,
            resolved: false,
            winner_outcome_index: None,
            realized_pnl: None,
            settled_at: None,
            created_at: Utc::now(),
        }
    }
}

/// One-time resolution written by the settlement reconciler.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub winner_outcome_index: usize,
    pub realized_pnl: Decimal,
    pub settled_at: DateTime<Utc>,
    /// Refreshed fill price, when the fill query produced one.
    pub trigger_price: Option<Decimal>,
    /// Refreshed fill cost, when the fill query produced one.
    pub amount: Option<Decimal>,
}

/// Durable trigger storage with insert-if-absent semantics on
/// `(strategy_id, period_start)`.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Insert a trigger unless one already exists for its cycle. Returns the
    /// stored row, or `None` if the cycle already had one.
    async fn insert(&self, trigger: NewTrigger) -> anyhow::Result<Option<Trigger>>;

    /// The trigger for a cycle, if any.
    async fn find_by_cycle(
        &self,
        strategy_id: i64,
        period_start: i64,
    ) -> anyhow::Result<Option<Trigger>>;

    /// Successful triggers with an order id that have not settled yet,
    /// oldest first.
    async fn unresolved_successes(&self) -> anyhow::Result<Vec<Trigger>>;

    /// Cache the on-chain condition id on a trigger.
    async fn set_condition_id(&self, id: Uuid, condition_id: &str) -> anyhow::Result<()>;

    /// Write the resolution fields once. Returns `false` when the trigger
    /// was already resolved (the update is skipped).
    async fn mark_resolved(&self, id: Uuid, resolution: Resolution) -> anyhow::Result<bool>;
}
