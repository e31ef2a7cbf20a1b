use clap::Parser;
use poly_tail::cli::{Cli, Commands};
use poly_tail::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    poly_tail::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting cycle watcher");
            args.execute(&config).await?;
        }
        Commands::Settle(args) => {
            tracing::info!("Running one-shot settlement sweep");
            args.execute(&config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!("  Store: {:?}", config.store.backend);
            println!("  Stream: {}", config.watcher.ws_url);
            println!(
                "  Engine: target_price={}, attempts={}",
                config.engine.target_price, config.engine.max_submit_attempts
            );
            println!(
                "  Settlement: every {}s",
                config.settlement.poll_interval_secs
            );
            println!("  Strategies: {}", config.strategies.len());
            println!("  Accounts: {}", config.accounts.len());
        }
    }

    Ok(())
}
