//! Scan-cycle orchestration.
//!
//! Each cycle fans out book fetches, freezes them into an immutable view,
//! runs the scanners against the dynamic threshold, and hands at most one
//! cross-exchange opportunity to the executor. Allocation cycles refresh
//! balances, recompute drift and the capital mode, and drive corrections.
//! Execution runs on its own task so an exchange's order-ack latency never
//! stalls the next scan.

pub mod health;

pub use health::{CycleStats, EngineHealth, HealthMonitor};

use crate::{
    capital::{
        compute_drift, CapitalAllocator, CapitalMode, ConversionManager, DriftController,
        DriftPolicy,
    },
    config::EngineConfig,
    connectors::{
        Exchange, ExchangeAdapter, FeeProvider, HealthProvider, HealthStatus, ModeProvider,
        PersistenceCollaborator, PortfolioSnapshot, TradingMode, TransferCollaborator,
    },
    data::{Asset, BookCache, MarketView, Pair},
    strategy::{CrossExchangeScanner, Opportunity, ProfitModel, ThresholdPolicy, TriangularScanner},
    trading::OpportunityExecutor,
    Result,
};
use chrono::Utc;
use futures_util::future::join_all;
use indexmap::IndexMap;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything a cycle produced, for logging and tests
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Opportunities found this cycle, ranked best first
    pub opportunities: Vec<Opportunity>,
    /// Whether an execution was submitted
    pub submitted: bool,
    /// Whether the triangular phase was skipped over budget
    pub budget_exhausted: bool,
}

/// The arbitrage engine: owns the scan loop and the allocation loop
pub struct ArbitrageEngine {
    config: EngineConfig,
    pairs: Vec<Pair>,
    allocator: Arc<CapitalAllocator>,
    adapters: IndexMap<Exchange, Arc<dyn ExchangeAdapter>>,
    fees: Arc<dyn FeeProvider>,
    health: EngineHealth,
    mode: Arc<dyn ModeProvider>,
    persistence: Arc<dyn PersistenceCollaborator>,
    transfer: Arc<dyn TransferCollaborator>,
    executor: Arc<OpportunityExecutor>,
    cache: Arc<BookCache>,
    cross_scanner: CrossExchangeScanner,
    tri_scanner: TriangularScanner,
    threshold_policy: ThresholdPolicy,
    drift_controller: DriftController,
    running: AtomicBool,
    cycle_count: AtomicU64,
    capital_mode: std::sync::Mutex<CapitalMode>,
    last_trading_mode: std::sync::Mutex<TradingMode>,
    execution_slot: Mutex<Option<JoinHandle<()>>>,
}

impl ArbitrageEngine {
    /// Build the engine from validated configuration and collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        allocator: Arc<CapitalAllocator>,
        adapters: IndexMap<Exchange, Arc<dyn ExchangeAdapter>>,
        fees: Arc<dyn FeeProvider>,
        health: EngineHealth,
        mode: Arc<dyn ModeProvider>,
        persistence: Arc<dyn PersistenceCollaborator>,
        transfer: Arc<dyn TransferCollaborator>,
    ) -> Result<Self> {
        config.validate()?;
        let pairs = config.tradable_pairs()?;

        let profit_model = ProfitModel::default();
        let cross_scanner = CrossExchangeScanner::new(
            profit_model,
            config.scanner.max_trade_usd,
            config.scanner.depth_multiplier,
            config.scanner.slippage_pct,
        );
        let tri_scanner =
            TriangularScanner::new(config.scanner.max_trade_usd, config.scanner.depth_multiplier);

        let executor = Arc::new(OpportunityExecutor::new(
            Arc::clone(&allocator),
            adapters.clone(),
            Arc::clone(&persistence),
            Duration::from_millis(config.execution.order_timeout_ms),
        ));

        let drift_policy = DriftPolicy {
            drift_threshold: config.drift_threshold(),
            critical_threshold: config.capital.critical_drift_threshold,
            conversion_loss_rate: config.capital.conversion_loss_rate,
            min_conversion_profit_pct: config.capital.min_conversion_profit_pct,
        };
        let drift_controller = DriftController::new(
            drift_policy,
            ConversionManager::new(
                TriangularScanner::new(
                    config.scanner.max_trade_usd,
                    config.scanner.depth_multiplier,
                ),
                config.capital.min_conversion_profit_pct,
            ),
        );

        let threshold_policy = config.threshold;
        let initial_mode = mode.current_mode();

        Ok(Self {
            config,
            pairs,
            allocator,
            adapters,
            fees,
            health,
            mode,
            persistence,
            transfer,
            executor,
            cache: Arc::new(BookCache::new()),
            cross_scanner,
            tri_scanner,
            threshold_policy,
            drift_controller,
            running: AtomicBool::new(false),
            cycle_count: AtomicU64::new(0),
            capital_mode: std::sync::Mutex::new(CapitalMode::Balanced),
            last_trading_mode: std::sync::Mutex::new(initial_mode),
            execution_slot: Mutex::new(None),
        })
    }

    /// Current capital mode
    pub fn capital_mode(&self) -> CapitalMode {
        *self.capital_mode.lock().expect("capital mode lock poisoned")
    }

    /// Shared book cache (feeds publish into it)
    pub fn cache(&self) -> Arc<BookCache> {
        Arc::clone(&self.cache)
    }

    /// Stop the run loop after the current cycle
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        info!("engine stop requested");
    }

    /// Main loop: scan cycles at the health-adjusted interval, with an
    /// allocation cycle every N scans
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::Relaxed);
        info!(pairs = self.pairs.len(), "engine started");

        while self.running.load(Ordering::Relaxed) {
            let started = Instant::now();
            let cycle = self.cycle_count.fetch_add(1, Ordering::Relaxed);

            if let Err(e) = self.run_scan_cycle().await {
                warn!(error = %e, "scan cycle failed; continuing");
            }

            if cycle % self.config.execution.allocation_every_n_cycles == 0 {
                if let Err(e) = self.run_allocation_cycle().await {
                    warn!(error = %e, "allocation cycle failed; retrying next time");
                }
            }

            let elapsed = started.elapsed();
            self.health.record_cycle(elapsed);
            histogram!("engine_cycle_seconds", elapsed.as_secs_f64());

            tokio::time::sleep(self.cycle_interval()).await;
        }

        info!("engine stopped");
        Ok(())
    }

    /// The scan interval, doubled while the system is degraded or critical
    /// (the explicit latency-slowdown mode)
    fn cycle_interval(&self) -> Duration {
        let base = Duration::from_millis(self.config.execution.cycle_interval_ms);
        match self.health.get_health_status().overall {
            HealthStatus::Healthy => base,
            HealthStatus::Degraded | HealthStatus::Critical => base * 2,
        }
    }

    /// One detection cycle: refresh, freeze a view, scan, submit
    pub async fn run_scan_cycle(&self) -> Result<CycleReport> {
        let budget = Duration::from_millis(self.config.execution.scan_budget_ms);
        let started = Instant::now();

        self.refresh_books().await;
        let view = self.cache.view(self.config.scanner.max_book_age_secs);
        if view.is_empty() {
            debug!("no books in view; nothing to scan");
            return Ok(CycleReport::default());
        }

        let report = self.detect(&view, started, budget);
        counter!(
            "opportunities_detected",
            report.opportunities.len() as u64
        );

        let submitted = self.submit_best(&report.opportunities).await;
        Ok(CycleReport {
            submitted,
            ..report
        })
    }

    fn detect(&self, view: &MarketView, started: Instant, budget: Duration) -> CycleReport {
        let health = self.health.get_health_status();
        let threshold = self.threshold_policy.get_threshold(&health);

        let mut opportunities = self.cross_scanner.scan(
            &self.pairs,
            view,
            self.allocator.as_ref(),
            self.fees.as_ref(),
            threshold,
        );

        // Over-budget cycles abandon the remaining scan phases instead of
        // delaying the next cycle.
        let mut budget_exhausted = false;
        if started.elapsed() >= budget {
            warn!("scan budget exhausted; skipping triangular phase");
            budget_exhausted = true;
        } else {
            for exchange in self.adapters.keys() {
                let mut paths = self.config.triangular_paths().unwrap_or_default();
                if self.config.scanner.derive_triangular_paths {
                    paths.extend(self.tri_scanner.derive_paths(view, *exchange));
                }
                paths.sort();
                paths.dedup();
                opportunities.extend(self.tri_scanner.scan(
                    *exchange,
                    &paths,
                    view,
                    self.allocator.as_ref(),
                    self.fees.as_ref(),
                    threshold,
                ));
                if started.elapsed() >= budget {
                    warn!("scan budget exhausted; skipping remaining exchanges");
                    budget_exhausted = true;
                    break;
                }
            }
        }

        // Rank best-first for the executor.
        opportunities.sort_by(|a, b| b.net_profit_pct().cmp(&a.net_profit_pct()));
        if !opportunities.is_empty() {
            info!(
                count = opportunities.len(),
                best = %opportunities[0].describe(),
                "opportunities detected"
            );
        }

        CycleReport {
            opportunities,
            submitted: false,
            budget_exhausted,
        }
    }

    /// Submit the single best opportunity, at most one per cycle, on a
    /// detached task. A still-running previous execution blocks new
    /// submissions — that is the capital-race serialization rule.
    async fn submit_best(&self, opportunities: &[Opportunity]) -> bool {
        let Some(best) = opportunities.first() else {
            return false;
        };

        let mut slot = self.execution_slot.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                debug!("previous execution still in flight; deferring");
                return false;
            }
        }

        let executor = Arc::clone(&self.executor);
        let opportunity = best.clone();
        *slot = Some(tokio::spawn(async move {
            if let Err(e) = executor.execute(&opportunity).await {
                warn!(error = %e, "execution failed");
            }
        }));
        counter!("opportunities_submitted", 1);
        true
    }

    /// Fan out book fetches, one task per (exchange, pair), each under its
    /// own timeout. A failed fetch evicts that book so the cycle simply
    /// sees reduced coverage.
    async fn refresh_books(&self) {
        let timeout = Duration::from_millis(self.config.execution.book_fetch_timeout_ms);
        let depth = self.config.scanner.book_depth;

        let mut tasks = Vec::new();
        for (exchange, adapter) in &self.adapters {
            for pair in &self.pairs {
                let adapter = Arc::clone(adapter);
                let exchange = *exchange;
                let pair = *pair;
                tasks.push(tokio::spawn(async move {
                    let fetch_started = Instant::now();
                    let result =
                        tokio::time::timeout(timeout, adapter.get_order_book(pair, depth)).await;
                    (exchange, pair, fetch_started.elapsed(), result)
                }));
            }
        }

        for task in join_all(tasks).await {
            let Ok((exchange, pair, latency, result)) = task else {
                continue;
            };
            match result {
                Ok(Ok(book)) => {
                    self.health
                        .record_heartbeat(exchange, latency.as_millis() as u64);
                    if let Err(e) = self.cache.publish(book) {
                        self.health.record_error(exchange);
                        self.cache.evict(exchange, pair);
                        debug!(exchange = %exchange, pair = %pair, error = %e, "book rejected");
                    }
                }
                Ok(Err(e)) => {
                    self.health.record_error(exchange);
                    self.cache.evict(exchange, pair);
                    debug!(exchange = %exchange, pair = %pair, error = %e, "book fetch failed");
                }
                Err(_) => {
                    self.health.record_error(exchange);
                    self.cache.evict(exchange, pair);
                    warn!(exchange = %exchange, pair = %pair, "book fetch timed out");
                }
            }
        }
    }

    /// One allocation cycle: mirror balances, recompute drift and capital
    /// mode, and drive corrections
    pub async fn run_allocation_cycle(&self) -> Result<()> {
        self.refresh_balances().await;
        let view = self.cache.view(self.config.scanner.max_book_age_secs);

        let current = self.allocator.current_allocations(&view);
        let targets = self.config.target_allocations()?;
        let drift = compute_drift(&current, &targets);

        let max_deviation = drift
            .iter()
            .map(|d| d.magnitude())
            .max()
            .unwrap_or(Decimal::ZERO);
        let total_stable = self.allocator.total_stable_value();
        let mode = CapitalMode::compute(
            max_deviation,
            total_stable,
            self.config.drift_threshold(),
            self.config.capital.bottleneck_floor,
        );
        {
            let mut current_mode = self.capital_mode.lock().expect("capital mode lock poisoned");
            if *current_mode != mode {
                info!(
                    from = %*current_mode,
                    to = %mode,
                    max_deviation = %max_deviation,
                    total_stable = %total_stable,
                    "capital mode changed"
                );
            }
            *current_mode = mode;
        }

        let outcomes = self
            .drift_controller
            .resolve(
                &drift,
                &view,
                self.allocator.as_ref(),
                self.fees.as_ref(),
                self.transfer.as_ref(),
                self.executor.as_ref(),
            )
            .await;
        for (asset, outcome) in &outcomes {
            debug!(asset = %asset, outcome = ?outcome, "drift outcome");
        }

        self.report_mode_switch(&view).await;
        Ok(())
    }

    /// Mirror per-exchange balances from the adapters
    async fn refresh_balances(&self) {
        for (exchange, adapter) in &self.adapters {
            for asset in Asset::all() {
                match adapter.get_balance(*asset).await {
                    Ok(balance) => {
                        self.allocator
                            .sync_balance(*exchange, *asset, balance.amount);
                    }
                    Err(e) => {
                        self.health.record_error(*exchange);
                        debug!(exchange = %exchange, asset = %asset, error = %e, "balance fetch failed");
                    }
                }
            }
        }
    }

    /// On a trading-mode switch, report the snapshot portfolio value back
    /// to the persistence collaborator. The mode itself is owned elsewhere;
    /// the core only reads it.
    async fn report_mode_switch(&self, view: &MarketView) {
        let mode = self.mode.current_mode();
        let changed = {
            let mut last = self
                .last_trading_mode
                .lock()
                .expect("trading mode lock poisoned");
            let changed = *last != mode;
            *last = mode;
            changed
        };
        if !changed {
            return;
        }

        let target = self.config.allocation_target(mode);
        info!(
            mode = %mode,
            arb = %target.arbitrage_pct,
            staking = %target.staking_pct,
            hedging = %target.hedging_pct,
            "trading mode switched"
        );
        let snapshot = PortfolioSnapshot {
            total_value_usd: self.allocator.total_value_usd(view),
            asset_values: self.allocator.portfolio_values(view),
            timestamp: Utc::now(),
        };
        if let Err(e) = self
            .persistence
            .update_portfolio_state(snapshot, &mode.to_string())
            .await
        {
            warn!(error = %e, "failed to persist mode-switch snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connectors::{
            ConfigFeeProvider, MemoryPersistence, MockModeProvider, PaperConfig, PaperExchange,
            StaticTransferTable,
        },
        data::{OrderBookLevel, OrderBookSnapshot},
    };
    use rust_decimal_macros::dec;

    fn btc_usdt() -> Pair {
        Pair::new(Asset::BTC, Asset::USDT).unwrap()
    }

    fn book(exchange: Exchange, bid: Decimal, ask: Decimal) -> OrderBookSnapshot {
        let bids = (0..5)
            .map(|i| OrderBookLevel::new(bid - Decimal::from(i), dec!(100)))
            .collect();
        let asks = (0..5)
            .map(|i| OrderBookLevel::new(ask + Decimal::from(i), dec!(100)))
            .collect();
        OrderBookSnapshot::new(exchange, btc_usdt(), bids, asks, Utc::now())
    }

    async fn engine_with_spread() -> (ArbitrageEngine, Arc<MemoryPersistence>) {
        let mut config = EngineConfig::default();
        config.scanner.pairs = vec!["BTC/USDT".to_string()];
        config.scanner.derive_triangular_paths = false;
        config.scanner.triangular_paths = Vec::new();
        config.exchanges.enabled = vec!["binance".to_string(), "kraken".to_string()];

        let binance = Arc::new(PaperExchange::new(Exchange::Binance, PaperConfig::default()));
        let kraken = Arc::new(PaperExchange::new(Exchange::Kraken, PaperConfig::default()));
        // Binance asks 50000, Kraken bids 50600: a clean 1%+ spread.
        binance
            .set_book(book(Exchange::Binance, dec!(49900), dec!(50000)))
            .await;
        kraken
            .set_book(book(Exchange::Kraken, dec!(50600), dec!(50700)))
            .await;
        binance.set_balance(Asset::USDT, dec!(5000)).await;
        kraken.set_balance(Asset::BTC, dec!(1)).await;

        let allocator = Arc::new(CapitalAllocator::new());
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(5000));
        allocator.sync_balance(Exchange::Kraken, Asset::BTC, dec!(1));

        let mut adapters: IndexMap<Exchange, Arc<dyn ExchangeAdapter>> = IndexMap::new();
        adapters.insert(Exchange::Binance, binance as Arc<dyn ExchangeAdapter>);
        adapters.insert(Exchange::Kraken, kraken as Arc<dyn ExchangeAdapter>);

        let persistence = Arc::new(MemoryPersistence::new());
        let mut mode = MockModeProvider::new();
        mode.expect_current_mode()
            .returning(|| TradingMode::BtcMode);

        let engine = ArbitrageEngine::new(
            config,
            allocator,
            adapters,
            Arc::new(ConfigFeeProvider::default()),
            EngineHealth::new(),
            Arc::new(mode),
            Arc::clone(&persistence) as Arc<dyn PersistenceCollaborator>,
            Arc::new(StaticTransferTable),
        )
        .unwrap();
        (engine, persistence)
    }

    #[tokio::test]
    async fn test_scan_cycle_detects_and_submits() {
        let (engine, persistence) = engine_with_spread().await;
        let report = engine.run_scan_cycle().await.unwrap();
        assert!(!report.opportunities.is_empty());
        assert!(report.submitted);

        // Let the detached execution task finish.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let trades = persistence.trades().await;
        assert_eq!(trades.len(), 1);
        assert!(trades[0].success);
    }

    #[tokio::test]
    async fn test_at_most_one_execution_per_cycle() {
        let (engine, _persistence) = engine_with_spread().await;
        let report = engine.run_scan_cycle().await.unwrap();
        // Multiple orderings may be detected, but only one submission.
        assert!(report.submitted);
        let slot = engine.execution_slot.lock().await;
        assert!(slot.is_some());
    }

    #[tokio::test]
    async fn test_allocation_cycle_mirrors_balances_and_mode() {
        let (engine, _persistence) = engine_with_spread().await;
        engine.run_scan_cycle().await.unwrap();
        engine.run_allocation_cycle().await.unwrap();

        // Paper balances were mirrored into the allocator.
        let usdt = engine.allocator.balance(Exchange::Binance, Asset::USDT);
        assert!(usdt.free > Decimal::ZERO);
        // BTC-heavy portfolio vs 50/25/25 targets: drifted, and stable
        // reserves (~$5k minus one trade) sit above the $1.5k floor, so
        // mode hinges on the drift threshold.
        let _ = engine.capital_mode();
    }

    #[tokio::test]
    async fn test_empty_view_yields_empty_cycle() {
        let mut config = EngineConfig::default();
        config.scanner.pairs = vec!["BTC/USDT".to_string()];
        config.exchanges.enabled = vec!["binance".to_string(), "kraken".to_string()];

        // Adapters with no books at all.
        let binance = Arc::new(PaperExchange::new(Exchange::Binance, PaperConfig::default()));
        let kraken = Arc::new(PaperExchange::new(Exchange::Kraken, PaperConfig::default()));
        let mut adapters: IndexMap<Exchange, Arc<dyn ExchangeAdapter>> = IndexMap::new();
        adapters.insert(Exchange::Binance, binance as Arc<dyn ExchangeAdapter>);
        adapters.insert(Exchange::Kraken, kraken as Arc<dyn ExchangeAdapter>);

        let mut mode = MockModeProvider::new();
        mode.expect_current_mode()
            .returning(|| TradingMode::BtcMode);

        let engine = ArbitrageEngine::new(
            config,
            Arc::new(CapitalAllocator::new()),
            adapters,
            Arc::new(ConfigFeeProvider::default()),
            EngineHealth::new(),
            Arc::new(mode),
            Arc::new(MemoryPersistence::new()) as Arc<dyn PersistenceCollaborator>,
            Arc::new(StaticTransferTable),
        )
        .unwrap();

        let report = engine.run_scan_cycle().await.unwrap();
        assert!(report.opportunities.is_empty());
        assert!(!report.submitted);
    }

    #[tokio::test]
    async fn test_degraded_health_doubles_interval() {
        let (engine, _persistence) = engine_with_spread().await;
        let base = Duration::from_millis(engine.config.execution.cycle_interval_ms);
        assert_eq!(engine.cycle_interval(), base);

        // Make one exchange look slow.
        engine.health.record_heartbeat(Exchange::Binance, 9000);
        engine.health.record_heartbeat(Exchange::Kraken, 50);
        assert_eq!(engine.cycle_interval(), base * 2);
    }
}
