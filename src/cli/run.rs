//! Run command implementation
//!
//! Wires the stores, venue clients, watcher and reconciler together and runs
//! until interrupted.

use crate::account::ConfigAccounts;
use crate::config::Config;
use crate::engine::{EngineDeps, TriggerEngine};
use crate::feed::{BinanceKlines, KlineConfig};
use crate::market::{CachedResolver, GammaClient, GammaConfig};
use crate::settle::{SettlementDeps, SettlementReconciler};
use crate::strategy::StrategyStore;
use crate::venue::{
    BalanceClient, ClobClient, ClobConfig, CtfOracle, Eip712OrderSigner, OnchainConfig,
    OrderClient,
};
use crate::watch::{BookWatcher, StrategyChange};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let (strategies, triggers) = super::build_stores(config).await?;
        let accounts = Arc::new(ConfigAccounts::new(config.accounts.clone()));
        let timeout = Duration::from_secs(config.venue.timeout_secs);

        let gamma = GammaClient::with_config(GammaConfig {
            base_url: config.venue.gamma_url.clone(),
            timeout,
        })?;
        let resolver = Arc::new(CachedResolver::new(Arc::new(gamma)));

        let clob = Arc::new(ClobClient::with_config(ClobConfig {
            base_url: config.venue.clob_url.clone(),
            timeout,
        })?);
        let orders: Arc<dyn OrderClient> = clob.clone();
        let balances: Arc<dyn BalanceClient> = clob;

        let signer = Arc::new(Eip712OrderSigner::new(
            config.venue.chain_id,
            &config.venue.exchange_address,
        )?);
        let candles = Arc::new(BinanceKlines::new(KlineConfig {
            base_url: config.feed.binance_url.clone(),
            symbol: config.feed.symbol.clone(),
            timeout,
        })?);
        let oracle = Arc::new(CtfOracle::new(OnchainConfig {
            rpc_url: config.venue.rpc_url.clone(),
            ctf_address: config.venue.ctf_address.clone(),
            timeout,
        })?);

        let engine = Arc::new(TriggerEngine::new(
            config.engine_config(),
            EngineDeps {
                triggers: triggers.clone(),
                accounts: accounts.clone(),
                signer,
                orders: orders.clone(),
                balances,
                candles,
            },
        ));

        let watcher = Arc::new(BookWatcher::new(
            config.watcher_config(),
            strategies.clone(),
            resolver.clone(),
            engine,
        ));
        let reconciler = Arc::new(SettlementReconciler::new(
            config.settlement_config(),
            SettlementDeps {
                triggers,
                strategies: strategies.clone(),
                resolver,
                oracle,
                orders,
                accounts,
            },
        ));

        let (changes_tx, changes_rx) = mpsc::channel(8);
        spawn_strategy_poller(
            strategies,
            changes_tx,
            Duration::from_secs(config.watcher.strategy_refresh_secs),
        );

        let watcher_task = tokio::spawn(watcher.run(changes_rx));
        tokio::spawn(reconciler.run());

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = watcher_task => match result {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow::anyhow!("watcher task panicked: {}", e)),
            },
        }
    }
}

/// Poll the strategy store and emit a change event when the enabled set
/// differs from the last poll. This is the single-binary stand-in for the
/// config service's change notifications.
fn spawn_strategy_poller(
    strategies: Arc<dyn StrategyStore>,
    changes: mpsc::Sender<StrategyChange>,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last = match strategies.enabled().await {
            Ok(set) => set,
            Err(_) => Vec::new(),
        };

        loop {
            ticker.tick().await;
            match strategies.enabled().await {
                Ok(current) => {
                    if current != last {
                        tracing::info!(
                            strategies = current.len(),
                            "Enabled strategy set changed"
                        );
                        last = current;
                        if changes.send(StrategyChange).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Strategy poll failed");
                }
            }
        }
    });
}
