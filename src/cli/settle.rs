//! Settle command implementation

use crate::account::ConfigAccounts;
use crate::config::Config;
use crate::settle::{SettlementDeps, SettlementReconciler};
use crate::venue::{ClobClient, ClobConfig, CtfOracle, OnchainConfig};
use crate::market::{GammaClient, GammaConfig};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct SettleArgs {}

impl SettleArgs {
    /// Run a single settlement sweep against the configured stores.
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let (strategies, triggers) = super::build_stores(config).await?;
        let timeout = Duration::from_secs(config.venue.timeout_secs);

        let reconciler = SettlementReconciler::new(
            config.settlement_config(),
            SettlementDeps {
                triggers,
                strategies,
                resolver: Arc::new(GammaClient::with_config(GammaConfig {
                    base_url: config.venue.gamma_url.clone(),
                    timeout,
                })?),
                oracle: Arc::new(CtfOracle::new(OnchainConfig {
                    rpc_url: config.venue.rpc_url.clone(),
                    ctf_address: config.venue.ctf_address.clone(),
                    timeout,
                })?),
                orders: Arc::new(ClobClient::with_config(ClobConfig {
                    base_url: config.venue.clob_url.clone(),
                    timeout,
                })?),
                accounts: Arc::new(ConfigAccounts::new(config.accounts.clone())),
            },
        );

        let settled = reconciler.sweep().await?;
        println!("Settled {} trigger(s)", settled);
        Ok(())
    }
}
