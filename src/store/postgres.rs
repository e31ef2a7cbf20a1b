//! PostgreSQL store implementations
//!
//! The trigger table carries a unique index on `(strategy_id, period_start)`
//! and inserts with `ON CONFLICT DO NOTHING`, so the one-trigger-per-cycle
//! invariant holds durably even if more than one writer ever runs. The
//! resolution update is guarded by `resolved = FALSE`, making settlement a
//! one-time transition at the store level too.

use crate::strategy::{AmountMode, SpreadMode, Strategy, StrategyStore};
use crate::trigger::{NewTrigger, Resolution, Trigger, TriggerStatus, TriggerStore};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tail_strategy (
    id                   BIGINT PRIMARY KEY,
    account_id           BIGINT NOT NULL,
    name                 TEXT,
    slug_template        TEXT NOT NULL,
    interval_seconds     INT NOT NULL,
    window_start_seconds INT NOT NULL,
    window_end_seconds   INT NOT NULL,
    min_price            NUMERIC(20,8) NOT NULL,
    max_price            NUMERIC(20,8) NOT NULL,
    amount_mode          TEXT NOT NULL,
    amount_value         NUMERIC(20,8) NOT NULL,
    spread_mode          TEXT NOT NULL DEFAULT 'none',
    min_spread           NUMERIC(20,8),
    enabled              BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS tail_trigger (
    id                   UUID PRIMARY KEY,
    strategy_id          BIGINT NOT NULL,
    period_start         BIGINT NOT NULL,
    market_title         TEXT,
    outcome_index        INT NOT NULL,
    trigger_price        NUMERIC(20,8) NOT NULL,
    amount               NUMERIC(20,8) NOT NULL,
    order_id             TEXT,
    status               TEXT NOT NULL,
    fail_reason          TEXT,
    condition_id         TEXT,
    resolved             BOOLEAN NOT NULL DEFAULT FALSE,
    winner_outcome_index INT,
    realized_pnl         NUMERIC(20,8),
    settled_at           TIMESTAMPTZ,
    created_at           TIMESTAMPTZ NOT NULL,
    UNIQUE (strategy_id, period_start)
);
"#;

/// Connect a pool and ensure the schema exists.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement).execute(&pool).await?;
    }
    Ok(pool)
}

pub struct PgStrategyStore {
    pool: PgPool,
}

impl PgStrategyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StrategyStore for PgStrategyStore {
    async fn enabled(&self) -> anyhow::Result<Vec<Strategy>> {
        let rows = sqlx::query("SELECT * FROM tail_strategy WHERE enabled = TRUE ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(strategy_from_row).collect()
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<Strategy>> {
        let row = sqlx::query("SELECT * FROM tail_strategy WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(strategy_from_row).transpose()
    }
}

pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn insert(&self, trigger: NewTrigger) -> anyhow::Result<Option<Trigger>> {
        let row = trigger.into_trigger();
        let inserted = sqlx::query(
            r#"
            INSERT INTO tail_trigger (
                id, strategy_id, period_start, market_title, outcome_index,
                trigger_price, amount, order_id, status, fail_reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (strategy_id, period_start) DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(row.strategy_id)
        .bind(row.period_start)
        .bind(&row.market_title)
        .bind(row.outcome_index as i32)
        .bind(row.trigger_price)
        .bind(row.amount)
        .bind(&row.order_id)
        .bind(row.status.as_str())
        .bind(&row.fail_reason)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        Ok((inserted.rows_affected() > 0).then_some(row))
    }

    async fn find_by_cycle(
        &self,
        strategy_id: i64,
        period_start: i64,
    ) -> anyhow::Result<Option<Trigger>> {
        let row =
            sqlx::query("SELECT * FROM tail_trigger WHERE strategy_id = $1 AND period_start = $2")
                .bind(strategy_id)
                .bind(period_start)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(trigger_from_row).transpose()
    }

    async fn unresolved_successes(&self) -> anyhow::Result<Vec<Trigger>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tail_trigger
            WHERE status = 'success' AND resolved = FALSE AND order_id IS NOT NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trigger_from_row).collect()
    }

    async fn set_condition_id(&self, id: Uuid, condition_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE tail_trigger SET condition_id = $2 WHERE id = $1")
            .bind(id)
            .bind(condition_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_resolved(&self, id: Uuid, resolution: Resolution) -> anyhow::Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE tail_trigger
            SET resolved = TRUE,
                winner_outcome_index = $2,
                realized_pnl = $3,
                settled_at = $4,
                trigger_price = COALESCE($5, trigger_price),
                amount = COALESCE($6, amount)
            WHERE id = $1 AND resolved = FALSE
            "#,
        )
        .bind(id)
        .bind(resolution.winner_outcome_index as i32)
        .bind(resolution.realized_pnl)
        .bind(resolution.settled_at)
        .bind(resolution.trigger_price)
        .bind(resolution.amount)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }
}

fn strategy_from_row(row: &PgRow) -> anyhow::Result<Strategy> {
    let amount_mode = match row.get::<String, _>("amount_mode").as_str() {
        "ratio" => AmountMode::Ratio,
        "fixed" => AmountMode::Fixed,
        other => anyhow::bail!("unknown amount_mode {:?}", other),
    };
    let spread_mode = match row.get::<String, _>("spread_mode").as_str() {
        "none" => SpreadMode::None,
        "fixed" => SpreadMode::Fixed,
        "auto" => SpreadMode::Auto,
        other => anyhow::bail!("unknown spread_mode {:?}", other),
    };

    Ok(Strategy {
        id: row.get("id"),
        account_id: row.get("account_id"),
        name: row.get("name"),
        slug_template: row.get("slug_template"),
        interval_seconds: row.get::<i32, _>("interval_seconds") as u32,
        window_start_seconds: row.get::<i32, _>("window_start_seconds") as u32,
        window_end_seconds: row.get::<i32, _>("window_end_seconds") as u32,
        min_price: row.get("min_price"),
        max_price: row.get("max_price"),
        amount_mode,
        amount_value: row.get("amount_value"),
        spread_mode,
        min_spread: row.get("min_spread"),
        enabled: row.get("enabled"),
    })
}

fn trigger_from_row(row: &PgRow) -> anyhow::Result<Trigger> {
    let status = match row.get::<String, _>("status").as_str() {
        "success" => TriggerStatus::Success,
        "fail" => TriggerStatus::Fail,
        other => anyhow::bail!("unknown trigger status {:?}", other),
    };

    Ok(Trigger {
        id: row.get("id"),
        strategy_id: row.get("strategy_id"),
        period_start: row.get("period_start"),
        market_title: row.get("market_title"),
        outcome_index: row.get::<i32, _>("outcome_index") as usize,
        trigger_price: row.get("trigger_price"),
        amount: row.get("amount"),
        order_id: row.get("order_id"),
        status,
        fail_reason: row.get("fail_reason"),
        condition_id: row.get("condition_id"),
        resolved: row.get("resolved"),
        winner_outcome_index: row
            .get::<Option<i32>, _>("winner_outcome_index")
            .map(|i| i as usize),
        realized_pnl: row.get("realized_pnl"),
        settled_at: row.get("settled_at"),
        created_at: row.get("created_at"),
    })
}
