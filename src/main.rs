use arb_engine::{
    capital::CapitalAllocator,
    config::EngineConfig,
    connectors::{
        ConfigFeeProvider, Exchange, ExchangeAdapter, FixedModeProvider, MemoryPersistence,
        PaperConfig, PaperExchange, PersistenceCollaborator, StaticTransferTable, TradingMode,
    },
    data::{Asset, OrderBookLevel, OrderBookSnapshot, Pair},
    engine::{ArbitrageEngine, EngineHealth, HealthMonitor},
    utils::logger,
    Result,
};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use indexmap::IndexMap;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "arb-engine")]
#[command(about = "Multi-exchange crypto arbitrage engine")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/engine.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file path
    #[arg(long, default_value = "logs/arb-engine.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against simulated (paper) exchanges
    Paper {
        /// Starting stable balance per exchange in USDT
        #[arg(long, default_value = "10000")]
        starting_balance: Decimal,
    },
    /// Validate configuration
    Validate,
    /// Show engine build information
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    logger::init(&cli.log_level, &cli.log_file)?;

    info!(version = arb_engine::VERSION, "starting arb-engine");

    let config = if cli.config.exists() {
        EngineConfig::from_file(&cli.config)?
    } else {
        info!(
            path = %cli.config.display(),
            "config file not found; using defaults"
        );
        EngineConfig::default()
    };

    match cli.command {
        Commands::Paper { starting_balance } => run_paper(config, starting_balance).await,
        Commands::Validate => validate_config(config).await,
        Commands::Status => show_status().await,
    }
}

async fn run_paper(config: EngineConfig, starting_balance: Decimal) -> Result<()> {
    config.validate()?;
    info!("starting paper trading mode");

    if config.monitoring.enable_metrics {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        builder
            .with_http_listener(([0, 0, 0, 0], config.monitoring.metrics_port))
            .install()
            .map_err(|e| anyhow::anyhow!("failed to install metrics exporter: {e}"))?;
        info!(port = config.monitoring.metrics_port, "metrics exporter up");
    }

    let exchanges = config.enabled_exchanges()?;
    let pairs = config.tradable_pairs()?;

    let allocator = Arc::new(CapitalAllocator::new());
    let mut adapters: IndexMap<Exchange, Arc<dyn ExchangeAdapter>> = IndexMap::new();
    for (i, exchange) in exchanges.iter().enumerate() {
        let paper = PaperExchange::new(*exchange, PaperConfig::default());
        paper.set_balance(Asset::USDT, starting_balance).await;
        paper.set_balance(Asset::USDC, starting_balance / dec!(2)).await;
        seed_demo_books(&paper, *exchange, &pairs, i).await;
        adapters.insert(*exchange, Arc::new(paper) as Arc<dyn ExchangeAdapter>);
    }

    let fees = Arc::new(ConfigFeeProvider::new(config.fee_schedules()?));
    let health = EngineHealth::new();
    let persistence = Arc::new(MemoryPersistence::new());
    if let Some(state) = persistence.load_last_state().await? {
        info!(total = %state.total_value_usd, "restored last portfolio state");
    }
    let monitor = HealthMonitor::new(
        health.clone(),
        Duration::from_secs(config.monitoring.health_check_interval_secs),
    );
    let monitor_stop = monitor.stop_handle();
    tokio::spawn(monitor.run());

    let engine = Arc::new(ArbitrageEngine::new(
        config,
        allocator,
        adapters,
        fees,
        health,
        Arc::new(FixedModeProvider(TradingMode::BtcMode)),
        Arc::clone(&persistence) as Arc<dyn PersistenceCollaborator>,
        Arc::new(StaticTransferTable),
    )?);

    let runner = Arc::clone(&engine);
    let run_task = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    engine.stop();
    monitor_stop.store(true, std::sync::atomic::Ordering::Relaxed);
    run_task.await??;

    let trades = persistence.trades().await;
    info!(trades = trades.len(), "paper session complete");
    Ok(())
}

/// Seed slightly skewed books per exchange so the paper session has
/// spreads to find, the same way the dry-run harness fabricates data.
async fn seed_demo_books(paper: &PaperExchange, exchange: Exchange, pairs: &[Pair], index: usize) {
    for pair in pairs {
        let base_price = match pair.base {
            Asset::BTC => dec!(50000),
            Asset::ETH => dec!(2600),
            Asset::SOL => dec!(150),
            Asset::PAXG => dec!(2400),
            _ => dec!(1),
        };
        // Give each venue some inventory of the base so sell legs can size.
        paper
            .set_balance(pair.base, dec!(10000) / base_price)
            .await;
        // Skew each venue in opposite directions so spreads exist.
        let skew = Decimal::from(index as i64 * 2 - 1) * base_price * dec!(0.004);
        let mid = base_price + skew;
        let spread = mid * dec!(0.0004);
        let qty = dec!(100000) / mid;

        let bids = (0..5)
            .map(|i| OrderBookLevel::new(mid - spread * Decimal::from(i + 1), qty))
            .collect();
        let asks = (0..5)
            .map(|i| OrderBookLevel::new(mid + spread * Decimal::from(i + 1), qty))
            .collect();
        paper
            .set_book(OrderBookSnapshot::new(
                exchange,
                *pair,
                bids,
                asks,
                chrono::Utc::now(),
            ))
            .await;
    }
}

async fn validate_config(config: EngineConfig) -> Result<()> {
    info!("validating configuration");

    match config.validate() {
        Ok(_) => {
            info!("configuration is valid");
            println!("Configuration validation passed!");
        }
        Err(e) => {
            error!(error = %e, "configuration validation failed");
            return Err(e);
        }
    }

    Ok(())
}

async fn show_status() -> Result<()> {
    println!("arb-engine");
    println!("  Version: {}", arb_engine::VERSION);
    println!("  Supported exchanges: binance, bybit, kraken, coinbase");
    Ok(())
}
