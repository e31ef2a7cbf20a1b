//! Trigger execution engine
//!
//! The decision-and-action core. A candidate price event (from the order
//! book stream or any backstop path) is validated against the strategy's
//! band, serialized through a per-cycle lock, checked against durable
//! storage, sized, submitted with bounded retries, and persisted as exactly
//! one trigger row per cycle. Nothing in here may take the watcher down: the
//! only error this module propagates is a failed store write.

mod context;
mod spread;

pub use context::{ContextCache, PeriodContext};
pub use spread::{auto_coefficient, SpreadGate};

use crate::account::AccountProvider;
use crate::cycle::{self, CycleKey};
use crate::feed::CandleFeed;
use crate::strategy::{AmountMode, Strategy};
use crate::trigger::{NewTrigger, TriggerStatus, TriggerStore};
use crate::venue::{BalanceClient, OrderArgs, OrderClient, OrderSigner, Side, SignedOrder};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed limit price orders are placed at. The engine does not chase the
    /// observed best bid; it caps an aggressive fill at this price.
    pub target_price: Decimal,
    /// Minimum invested amount in USDC.
    pub min_amount: Decimal,
    /// Decimal places the venue accepts on order sizes.
    pub size_decimals: u32,
    /// Submission attempts before giving up.
    pub max_submit_attempts: u32,
    /// Delay between submission attempts.
    pub retry_delay: Duration,
    /// Wait before querying the actual fill after a successful submission.
    pub fill_check_delay: Duration,
    /// Candles inspected for the auto spread base.
    pub spread_lookback: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            target_price: dec!(0.99),
            min_amount: dec!(1),
            size_decimals: 2,
            max_submit_attempts: 3,
            retry_delay: Duration::from_millis(500),
            fill_check_delay: Duration::from_secs(1),
            spread_lookback: 24,
        }
    }
}

/// External collaborators the engine runs against.
pub struct EngineDeps {
    pub triggers: Arc<dyn TriggerStore>,
    pub accounts: Arc<dyn AccountProvider>,
    pub signer: Arc<dyn OrderSigner>,
    pub orders: Arc<dyn OrderClient>,
    pub balances: Arc<dyn BalanceClient>,
    pub candles: Arc<dyn CandleFeed>,
}

pub struct TriggerEngine {
    config: EngineConfig,
    deps: EngineDeps,
    contexts: ContextCache,
    spread_gate: SpreadGate,
    /// Per-cycle exclusive gates. Entries are created on demand and never
    /// removed; live cycles are bounded so the table stays small.
    cycle_locks: DashMap<CycleKey, Arc<Mutex<()>>>,
    /// Cycles whose first qualifying event was already logged, with expiry.
    condition_logged: DashMap<CycleKey, i64>,
}

impl TriggerEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let spread_gate = SpreadGate::new(deps.candles.clone(), config.spread_lookback);
        Self {
            config,
            deps,
            contexts: ContextCache::new(),
            spread_gate,
            cycle_locks: DashMap::new(),
            condition_logged: DashMap::new(),
        }
    }

    /// Handle one candidate price event for a cycle.
    ///
    /// Out-of-range outcome indexes and prices outside the band are no-ops,
    /// not errors. At most one trigger row results per cycle regardless of
    /// how many candidates race through here.
    pub async fn on_candidate_price(
        &self,
        strategy: &Strategy,
        period_start: i64,
        market_title: Option<&str>,
        token_ids: &[String],
        outcome_index: usize,
        best_bid: Decimal,
    ) -> anyhow::Result<()> {
        if outcome_index >= token_ids.len() {
            return Ok(());
        }
        if best_bid < strategy.min_price || best_bid > strategy.max_price {
            return Ok(());
        }

        let key = CycleKey::new(strategy.id, period_start);
        let cycle_lock = self.cycle_locks.entry(key).or_default().clone();
        let _guard = cycle_lock.lock().await;

        // Re-check under the lock: the durable row is the source of truth
        // for "this cycle already fired".
        if self
            .deps
            .triggers
            .find_by_cycle(strategy.id, period_start)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        self.log_first_qualifying(key, strategy, outcome_index, best_bid, now);

        if !self
            .spread_gate
            .pass(strategy, period_start, outcome_index, now)
            .await
        {
            tracing::debug!(
                strategy_id = strategy.id,
                period_start,
                outcome_index,
                "Spread gate closed, skipping cycle"
            );
            return Ok(());
        }

        self.place_order(
            strategy,
            period_start,
            market_title,
            token_ids,
            outcome_index,
            best_bid,
            now,
        )
        .await
    }

    /// Size, sign, submit and persist. Runs under the cycle lock.
    #[allow(clippy::too_many_arguments)]
    async fn place_order(
        &self,
        strategy: &Strategy,
        period_start: i64,
        market_title: Option<&str>,
        token_ids: &[String],
        outcome_index: usize,
        best_bid: Decimal,
        now: i64,
    ) -> anyhow::Result<()> {
        let amount = match self.invested_amount(strategy).await {
            Ok(amount) => amount,
            Err(reason) => {
                return self
                    .persist_fail(
                        strategy,
                        period_start,
                        market_title,
                        outcome_index,
                        best_bid,
                        Decimal::ZERO,
                        reason,
                    )
                    .await;
            }
        };
        if amount < self.config.min_amount {
            return self
                .persist_fail(
                    strategy,
                    period_start,
                    market_title,
                    outcome_index,
                    best_bid,
                    amount,
                    "insufficient amount".to_string(),
                )
                .await;
        }

        let size = self.order_size(amount);
        let fixed_size = (strategy.amount_mode == AmountMode::Fixed).then_some(size);
        let context = match self
            .contexts
            .ensure(
                strategy,
                period_start,
                token_ids,
                market_title,
                now,
                fixed_size,
                self.config.target_price,
                self.deps.accounts.as_ref(),
                self.deps.orders.as_ref(),
                self.deps.signer.as_ref(),
            )
            .await
        {
            Ok(context) => context,
            Err(reason) => {
                return self
                    .persist_fail(
                        strategy,
                        period_start,
                        market_title,
                        outcome_index,
                        best_bid,
                        amount,
                        reason,
                    )
                    .await;
            }
        };

        let token_id = &token_ids[outcome_index];
        let signed = match self.obtain_signed_order(strategy, &context, token_id, outcome_index, size).await {
            Ok(signed) => signed,
            Err(reason) => {
                return self
                    .persist_fail(
                        strategy,
                        period_start,
                        market_title,
                        outcome_index,
                        best_bid,
                        amount,
                        reason,
                    )
                    .await;
            }
        };

        match self.submit_with_retry(&context, &signed).await {
            Ok(order_id) => {
                let (trigger_price, amount) = self
                    .confirmed_fill(&context, &order_id, best_bid, amount)
                    .await;
                tracing::info!(
                    strategy_id = strategy.id,
                    period_start,
                    outcome_index,
                    order_id = %order_id,
                    %trigger_price,
                    %amount,
                    "Cycle trigger submitted"
                );
                self.persist(NewTrigger {
                    strategy_id: strategy.id,
                    period_start,
                    market_title: market_title.map(str::to_string),
                    outcome_index,
                    trigger_price,
                    amount,
                    order_id: Some(order_id),
                    status: TriggerStatus::Success,
                    fail_reason: None,
                })
                .await
            }
            Err(reason) => {
                self.persist_fail(
                    strategy,
                    period_start,
                    market_title,
                    outcome_index,
                    best_bid,
                    amount,
                    reason,
                )
                .await
            }
        }
    }

    /// Invested USDC for this trigger. Balance lookup failures degrade to
    /// zero so they surface as an insufficient-amount fail trigger.
    async fn invested_amount(&self, strategy: &Strategy) -> Result<Decimal, String> {
        match strategy.amount_mode {
            AmountMode::Fixed => Ok(strategy.amount_value),
            AmountMode::Ratio => {
                let Some(credentials) = self.deps.accounts.credentials(strategy.account_id) else {
                    return Err(format!(
                        "account {} credentials unavailable",
                        strategy.account_id
                    ));
                };
                let balance = match self.deps.balances.available_balance(&credentials).await {
                    Ok(balance) => balance,
                    Err(e) => {
                        tracing::warn!(
                            strategy_id = strategy.id,
                            error = %e,
                            "Balance query failed, treating as zero"
                        );
                        Decimal::ZERO
                    }
                };
                Ok(balance * strategy.amount_value)
            }
        }
    }

    /// Shares bought for `amount` at the target price, rounded up to the
    /// venue's size precision, floor one share.
    fn order_size(&self, amount: Decimal) -> Decimal {
        (amount / self.config.target_price)
            .round_dp_with_strategy(self.config.size_decimals, RoundingStrategy::AwayFromZero)
            .max(Decimal::ONE)
    }

    /// Pre-signed order when available (fixed mode), fresh signature
    /// otherwise.
    async fn obtain_signed_order(
        &self,
        strategy: &Strategy,
        context: &PeriodContext,
        token_id: &str,
        outcome_index: usize,
        size: Decimal,
    ) -> Result<SignedOrder, String> {
        if strategy.amount_mode == AmountMode::Fixed {
            if let Some(order) = context.presigned.get(outcome_index).and_then(|o| o.clone()) {
                return Ok(order);
            }
        }

        let args = OrderArgs {
            token_id: token_id.to_string(),
            side: Side::Buy,
            price: self.config.target_price,
            size,
            fee_rate_bps: context
                .fee_rate_by_token
                .get(token_id)
                .copied()
                .unwrap_or_default(),
        };
        self.deps
            .signer
            .sign(&context.credentials, &args)
            .await
            .map_err(|e| format!("signing failed: {}", e))
    }

    /// Submit with bounded retries and a fixed delay between attempts.
    /// Returns the venue order id or the last failure reason.
    async fn submit_with_retry(
        &self,
        context: &PeriodContext,
        signed: &SignedOrder,
    ) -> Result<String, String> {
        let mut last_reason = String::from("unknown");
        for attempt in 1..=self.config.max_submit_attempts {
            match self.deps.orders.submit(&context.credentials, signed).await {
                Ok(ack) if ack.success => {
                    if let Some(order_id) = ack.order_id {
                        return Ok(order_id);
                    }
                    last_reason = "venue ack without order id".to_string();
                }
                Ok(ack) => {
                    last_reason = ack.error_msg.unwrap_or_else(|| "venue rejection".to_string());
                }
                Err(e) => {
                    last_reason = e.to_string();
                }
            }
            tracing::warn!(attempt, reason = %last_reason, "Order submission attempt failed");
            if attempt < self.config.max_submit_attempts {
                sleep(self.config.retry_delay).await;
            }
        }
        Err(last_reason)
    }

    /// The actual fill after submission, falling back to the computed values
    /// when the query fails or reports a degenerate fill.
    async fn confirmed_fill(
        &self,
        context: &PeriodContext,
        order_id: &str,
        computed_price: Decimal,
        computed_amount: Decimal,
    ) -> (Decimal, Decimal) {
        sleep(self.config.fill_check_delay).await;
        match self
            .deps
            .orders
            .order_fill(&context.credentials, order_id)
            .await
        {
            Ok(Some(fill)) if fill.is_usable() => {
                let amount = (fill.price * fill.size_matched).round_dp(8);
                (fill.price, amount)
            }
            Ok(_) => (computed_price, computed_amount),
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "Fill query failed, keeping computed values");
                (computed_price, computed_amount)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_fail(
        &self,
        strategy: &Strategy,
        period_start: i64,
        market_title: Option<&str>,
        outcome_index: usize,
        trigger_price: Decimal,
        amount: Decimal,
        reason: String,
    ) -> anyhow::Result<()> {
        tracing::warn!(
            strategy_id = strategy.id,
            period_start,
            outcome_index,
            reason = %reason,
            "Cycle trigger failed"
        );
        self.persist(NewTrigger {
            strategy_id: strategy.id,
            period_start,
            market_title: market_title.map(str::to_string),
            outcome_index,
            trigger_price,
            amount,
            order_id: None,
            status: TriggerStatus::Fail,
            fail_reason: Some(reason),
        })
        .await
    }

    async fn persist(&self, trigger: NewTrigger) -> anyhow::Result<()> {
        let status = trigger.status;
        match self.deps.triggers.insert(trigger).await? {
            Some(_) => {
                metrics::counter!("polytail_triggers_total", "status" => status.as_str())
                    .increment(1);
            }
            None => {
                // Lost a cross-process race; the lock already prevents this
                // within one process.
                tracing::warn!("Trigger row already present at insert time");
            }
        }
        Ok(())
    }

    /// Log the first qualifying event of a cycle once.
    fn log_first_qualifying(
        &self,
        key: CycleKey,
        strategy: &Strategy,
        outcome_index: usize,
        best_bid: Decimal,
        now: i64,
    ) {
        if self.condition_logged.contains_key(&key) {
            return;
        }
        if self.condition_logged.len() > 128 {
            self.condition_logged.retain(|_, expires_at| *expires_at > now);
        }
        self.condition_logged
            .insert(key, cycle::period_end(key.period_start, strategy.interval_seconds));

        let direction = if outcome_index == 0 { "Up" } else { "Down" };
        tracing::info!(
            strategy = %strategy.display_name(),
            strategy_id = strategy.id,
            period_start = key.period_start,
            direction,
            best_bid = %best_bid,
            "First qualifying price of cycle"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{test_credentials, Credentials};
    use crate::store::MemoryTriggerStore;
    use crate::strategy::test_strategy;
    use crate::trigger::Trigger;
    use crate::venue::{OrderAck, OrderFill};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticAccounts;

    impl AccountProvider for StaticAccounts {
        fn credentials(&self, account_id: i64) -> Option<Credentials> {
            (account_id == 1).then(|| test_credentials(1))
        }
    }

    struct StubSigner;

    #[async_trait]
    impl OrderSigner for StubSigner {
        async fn sign(&self, creds: &Credentials, args: &OrderArgs) -> anyhow::Result<SignedOrder> {
            Ok(SignedOrder {
                salt: "1".to_string(),
                maker: creds.maker_address().to_string(),
                signer: creds.address.clone(),
                taker: "0x0".to_string(),
                token_id: args.token_id.clone(),
                maker_amount: (args.size * args.price).to_string(),
                taker_amount: args.size.to_string(),
                expiration: "0".to_string(),
                nonce: "0".to_string(),
                fee_rate_bps: args.fee_rate_bps.to_string(),
                side: args.side.as_str().to_string(),
                signature_type: creds.signature_type(),
                signature: "0xstub".to_string(),
            })
        }
    }

    struct StaticBalance(Decimal);

    #[async_trait]
    impl BalanceClient for StaticBalance {
        async fn available_balance(&self, _creds: &Credentials) -> anyhow::Result<Decimal> {
            Ok(self.0)
        }
    }

    struct NoCandles;

    #[async_trait]
    impl CandleFeed for NoCandles {
        async fn current_candle(
            &self,
            _interval_seconds: u32,
            _period_start: i64,
        ) -> anyhow::Result<Option<crate::feed::Candle>> {
            Ok(None)
        }

        async fn recent_candles(
            &self,
            _interval_seconds: u32,
            _period_start: i64,
            _count: u32,
        ) -> anyhow::Result<Vec<crate::feed::Candle>> {
            Ok(vec![])
        }
    }

    /// Scripted order client: per-attempt submission outcomes plus an
    /// optional fill answer.
    struct ScriptedOrders {
        submissions: AtomicUsize,
        script: Vec<Result<OrderAck, String>>,
        fill: Option<Result<Option<OrderFill>, String>>,
    }

    impl ScriptedOrders {
        fn accepting() -> Self {
            Self {
                submissions: AtomicUsize::new(0),
                script: vec![Ok(OrderAck {
                    success: true,
                    order_id: Some("0xoid".to_string()),
                    error_msg: None,
                })],
                fill: None,
            }
        }

        fn count(&self) -> usize {
            self.submissions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OrderClient for ScriptedOrders {
        async fn submit(
            &self,
            _creds: &Credentials,
            _order: &SignedOrder,
        ) -> anyhow::Result<OrderAck> {
            let attempt = self.submissions.fetch_add(1, Ordering::SeqCst);
            let step = self.script.get(attempt).or_else(|| self.script.last());
            match step {
                Some(Ok(ack)) => Ok(ack.clone()),
                Some(Err(e)) => Err(anyhow::anyhow!("{}", e)),
                None => Err(anyhow::anyhow!("no scripted response")),
            }
        }

        async fn order_fill(
            &self,
            _creds: &Credentials,
            _order_id: &str,
        ) -> anyhow::Result<Option<OrderFill>> {
            match &self.fill {
                Some(Ok(fill)) => Ok(*fill),
                Some(Err(e)) => Err(anyhow::anyhow!("{}", e)),
                None => Ok(None),
            }
        }

        async fn fee_rate_bps(&self, _token_id: &str) -> anyhow::Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    struct Harness {
        engine: Arc<TriggerEngine>,
        triggers: Arc<MemoryTriggerStore>,
        orders: Arc<ScriptedOrders>,
    }

    fn harness_with(orders: ScriptedOrders, balance: Decimal) -> Harness {
        let triggers = Arc::new(MemoryTriggerStore::new());
        let orders = Arc::new(orders);
        let config = EngineConfig {
            retry_delay: Duration::from_millis(1),
            fill_check_delay: Duration::from_millis(1),
            ..EngineConfig::default()
        };
        let engine = Arc::new(TriggerEngine::new(
            config,
            EngineDeps {
                triggers: triggers.clone(),
                accounts: Arc::new(StaticAccounts),
                signer: Arc::new(StubSigner),
                orders: orders.clone(),
                balances: Arc::new(StaticBalance(balance)),
                candles: Arc::new(NoCandles),
            },
        ));
        Harness {
            engine,
            triggers,
            orders,
        }
    }

    fn tokens() -> Vec<String> {
        vec!["tok-up".to_string(), "tok-down".to_string()]
    }

    fn current_period() -> i64 {
        cycle::period_start(Utc::now().timestamp(), 300)
    }

    async fn only_trigger(store: &MemoryTriggerStore) -> Trigger {
        let all = store.all().await;
        assert_eq!(all.len(), 1);
        all.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_ratio_trigger_success() {
        // balance 100, ratio 10% -> amount 10, size = ceil(10 / 0.99)
        let h = harness_with(ScriptedOrders::accepting(), dec!(100));
        let strategy = test_strategy(1);
        let period = current_period();

        h.engine
            .on_candidate_price(&strategy, period, Some("BTC up or down"), &tokens(), 0, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.status, TriggerStatus::Success);
        assert_eq!(trigger.amount, dec!(10));
        assert_eq!(trigger.trigger_price, dec!(0.5));
        assert_eq!(trigger.order_id.as_deref(), Some("0xoid"));
        assert_eq!(trigger.market_title.as_deref(), Some("BTC up or down"));
        assert_eq!(h.orders.count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_candidates_single_trigger() {
        let h = harness_with(ScriptedOrders::accepting(), dec!(100));
        let strategy = test_strategy(1);
        let period = current_period();
        let toks = tokens();

        let first = h
            .engine
            .on_candidate_price(&strategy, period, None, &toks, 0, dec!(0.5));
        let second = h
            .engine
            .on_candidate_price(&strategy, period, None, &toks, 1, dec!(0.48));
        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();

        // exactly one row and one submission: the loser saw the winner's row
        assert_eq!(h.triggers.all().await.len(), 1);
        assert_eq!(h.orders.count(), 1);
    }

    #[tokio::test]
    async fn test_price_band_gating() {
        let h = harness_with(ScriptedOrders::accepting(), dec!(100));
        let mut strategy = test_strategy(1);
        strategy.min_price = dec!(0.90);
        strategy.max_price = dec!(0.99);
        let period = current_period();

        h.engine
            .on_candidate_price(&strategy, period, None, &tokens(), 0, dec!(0.89))
            .await
            .unwrap();
        h.engine
            .on_candidate_price(&strategy, period, None, &tokens(), 0, dec!(0.995))
            .await
            .unwrap();

        assert!(h.triggers.all().await.is_empty());
        assert_eq!(h.orders.count(), 0);
    }

    #[tokio::test]
    async fn test_outcome_index_out_of_range_is_noop() {
        let h = harness_with(ScriptedOrders::accepting(), dec!(100));
        let strategy = test_strategy(1);

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 2, dec!(0.5))
            .await
            .unwrap();
        assert!(h.triggers.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_amount_records_fail() {
        // balance 5, ratio 10% -> amount 0.5 < 1 USDC minimum
        let h = harness_with(ScriptedOrders::accepting(), dec!(5));
        let strategy = test_strategy(1);

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 0, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.status, TriggerStatus::Fail);
        assert_eq!(trigger.fail_reason.as_deref(), Some("insufficient amount"));
        assert!(trigger.order_id.is_none());
        assert_eq!(h.orders.count(), 0);
    }

    #[tokio::test]
    async fn test_submission_retries_then_succeeds() {
        let orders = ScriptedOrders {
            submissions: AtomicUsize::new(0),
            script: vec![
                Err("connection reset".to_string()),
                Ok(OrderAck {
                    success: true,
                    order_id: Some("0xoid".to_string()),
                    error_msg: None,
                }),
            ],
            fill: None,
        };
        let h = harness_with(orders, dec!(100));
        let strategy = test_strategy(1);

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 0, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.status, TriggerStatus::Success);
        assert_eq!(h.orders.count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_record_last_reason() {
        let orders = ScriptedOrders {
            submissions: AtomicUsize::new(0),
            script: vec![Ok(OrderAck {
                success: false,
                order_id: None,
                error_msg: Some("not enough balance / allowance".to_string()),
            })],
            fill: None,
        };
        let h = harness_with(orders, dec!(100));
        let strategy = test_strategy(1);

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 0, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.status, TriggerStatus::Fail);
        assert_eq!(
            trigger.fail_reason.as_deref(),
            Some("not enough balance / allowance")
        );
        assert_eq!(h.orders.count(), 3);
    }

    #[tokio::test]
    async fn test_fill_refines_price_and_amount() {
        let orders = ScriptedOrders {
            fill: Some(Ok(Some(OrderFill {
                price: dec!(0.98),
                size_matched: dec!(10.11),
            }))),
            ..ScriptedOrders::accepting()
        };
        let h = harness_with(orders, dec!(100));
        let strategy = test_strategy(1);

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 0, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.trigger_price, dec!(0.98));
        assert_eq!(trigger.amount, dec!(9.9078));
    }

    #[tokio::test]
    async fn test_fill_query_failure_keeps_computed_values() {
        let orders = ScriptedOrders {
            fill: Some(Err("timeout".to_string())),
            ..ScriptedOrders::accepting()
        };
        let h = harness_with(orders, dec!(100));
        let strategy = test_strategy(1);

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 0, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.status, TriggerStatus::Success);
        // fallback: the candidate best bid and the computed amount, not zero
        assert_eq!(trigger.trigger_price, dec!(0.5));
        assert_eq!(trigger.amount, dec!(10));
    }

    #[tokio::test]
    async fn test_degenerate_fill_keeps_computed_values() {
        let orders = ScriptedOrders {
            fill: Some(Ok(Some(OrderFill {
                price: dec!(0),
                size_matched: dec!(0),
            }))),
            ..ScriptedOrders::accepting()
        };
        let h = harness_with(orders, dec!(100));
        let strategy = test_strategy(1);

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 0, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.trigger_price, dec!(0.5));
        assert_eq!(trigger.amount, dec!(10));
    }

    #[tokio::test]
    async fn test_fixed_mode_uses_presigned_order() {
        let h = harness_with(ScriptedOrders::accepting(), dec!(100));
        let mut strategy = test_strategy(1);
        strategy.amount_mode = AmountMode::Fixed;
        strategy.amount_value = dec!(20);

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 1, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.status, TriggerStatus::Success);
        assert_eq!(trigger.amount, dec!(20));
        assert_eq!(trigger.outcome_index, 1);
    }

    #[tokio::test]
    async fn test_missing_account_records_fail() {
        let h = harness_with(ScriptedOrders::accepting(), dec!(100));
        let mut strategy = test_strategy(1);
        strategy.account_id = 99;

        h.engine
            .on_candidate_price(&strategy, current_period(), None, &tokens(), 0, dec!(0.5))
            .await
            .unwrap();

        let trigger = only_trigger(&h.triggers).await;
        assert_eq!(trigger.status, TriggerStatus::Fail);
        assert!(trigger
            .fail_reason
            .as_deref()
            .unwrap()
            .contains("credentials unavailable"));
    }

    #[tokio::test]
    async fn test_existing_trigger_short_circuits() {
        let h = harness_with(ScriptedOrders::accepting(), dec!(100));
        let strategy = test_strategy(1);
        let period = current_period();

        h.engine
            .on_candidate_price(&strategy, period, None, &tokens(), 0, dec!(0.5))
            .await
            .unwrap();
        h.engine
            .on_candidate_price(&strategy, period, None, &tokens(), 0, dec!(0.6))
            .await
            .unwrap();

        assert_eq!(h.triggers.all().await.len(), 1);
        assert_eq!(h.orders.count(), 1);
    }

    #[test]
    fn test_order_size_rounds_up_with_floor() {
        let h = harness_with(ScriptedOrders::accepting(), dec!(100));
        // 10 / 0.99 = 10.1010... -> 10.11
        assert_eq!(h.engine.order_size(dec!(10)), dec!(10.11));
        // tiny amounts floor at one share
        assert_eq!(h.engine.order_size(dec!(0.5)), dec!(1));
    }
}
