//! CLI interface for poly-tail
//!
//! Provides subcommands for:
//! - `run`: watch cycle markets and execute triggers until shutdown
//! - `settle`: run one settlement sweep and exit
//! - `config`: show the effective configuration

mod run;
mod settle;

pub use run::RunArgs;
pub use settle::SettleArgs;

use crate::config::{Config, StoreBackend};
use crate::store::{MemoryStrategyStore, MemoryTriggerStore, PgStrategyStore, PgTriggerStore};
use crate::strategy::StrategyStore;
use crate::trigger::TriggerStore;
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "poly-tail")]
#[command(about = "Tail-window trigger bot for Polymarket up/down cycle markets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch cycle markets and execute triggers
    Run(RunArgs),
    /// Run one settlement sweep and exit
    Settle(SettleArgs),
    /// Show the effective configuration
    Config,
}

/// Build the configured store backend.
pub(crate) async fn build_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn StrategyStore>, Arc<dyn TriggerStore>)> {
    match config.store.backend {
        StoreBackend::Memory => Ok((
            Arc::new(MemoryStrategyStore::new(config.strategies.clone())),
            Arc::new(MemoryTriggerStore::new()),
        )),
        StoreBackend::Postgres => {
            let url = config
                .store
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("store.database_url missing"))?;
            let pool = crate::store::postgres::connect(url).await?;
            Ok((
                Arc::new(PgStrategyStore::new(pool.clone())),
                Arc::new(PgTriggerStore::new(pool)),
            ))
        }
    }
}
