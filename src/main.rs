//! PortfolioGuard - Main Entry Point
//!
//! Runs recurring purchases and allocation rebalancing against a simulated
//! exchange seeded from the `[paper]` configuration section.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use portfolio_guard::config::{load_config, AppConfig};
use portfolio_guard::{
    spawn_engine_worker, ExchangeClient, ExecutionEngine, IntentOrigin, PaperExchange,
    PortfolioRunner, Side, TradeIntent,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "PORTFOLIO_GUARD_CONFIG")]
    config: String,

    /// Log level (trace, debug, info, warn, error); defaults to settings.log_level
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run cycles every settings.tick_interval_seconds until ctrl-c
    Run,
    /// Run a single cycle and exit
    Once,
    /// Print the current rebalance plan without trading
    Plan,
    /// Dry-run one trade through pricing and safety checks
    Preview {
        #[arg(long)]
        asset: String,
        #[arg(long)]
        side: Side,
        #[arg(long)]
        usd: Decimal,
    },
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let config = load_config(Some(&args.config)).context("failed to load configuration")?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone())
        .to_lowercase();
    init_logging(&level, args.log_json)?;

    info!("Starting PortfolioGuard in {} mode", config.engine.mode);
    info!("Configuration file: {}", args.config);

    let exchange: Arc<dyn ExchangeClient> = Arc::new(PaperExchange::from_config(&config.paper));
    let engine = Arc::new(ExecutionEngine::from_config(&config, exchange.clone())?);

    match args.command {
        Command::Preview { asset, side, usd } => {
            let intent = TradeIntent::new(
                side,
                &asset,
                portfolio_guard::OrderAmount::Quote(usd),
                IntentOrigin::Manual,
                "manual preview",
            );
            let preview = engine.preview(&intent).await;
            println!("{}", preview);
        }
        Command::Plan => {
            let runner = PortfolioRunner::from_config(&config, exchange, engine, Utc::now())?;
            if runner.planner().is_none() {
                println!("No target allocations configured");
                return Ok(());
            }
            let plan = runner.plan_now(Utc::now()).await?;
            println!("{}", plan);
        }
        Command::Once => {
            let mut runner = PortfolioRunner::from_config(&config, exchange, engine, Utc::now())?;
            let report = runner.run_cycle(Utc::now()).await;
            println!("{}", report);
        }
        Command::Run => run(&config, exchange, engine).await?,
    }

    Ok(())
}

async fn run(config: &AppConfig, exchange: Arc<dyn ExchangeClient>, engine: Arc<ExecutionEngine>) -> Result<()> {
    let (handle, worker) = spawn_engine_worker(engine, config.engine.queue_capacity);
    let mut runner = PortfolioRunner::from_config(config, exchange, Arc::new(handle), Utc::now())?;

    if let Some(next) = runner.scheduler().next_due() {
        info!("Next recurring purchase at {}", next);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.settings.tick_interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("Application initialized successfully");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = runner.run_cycle(Utc::now()).await;
                if report.executed_count() + report.failed_count() > 0 || report.persist_error.is_some() {
                    info!("{}", report);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, cleaning up...");
                break;
            }
        }
    }

    // dropping the runner closes the queue; the worker drains and exits
    drop(runner);
    if let Err(e) = worker.await {
        warn!("Engine worker ended abnormally: {}", e);
    }
    Ok(())
}
