//! Concurrent reservation semantics and drift resolution

use arb_engine::{
    capital::{
        compute_drift, CapitalAllocator, CapitalMode, ConversionExecutor, ConversionManager,
        DriftController, DriftOutcome, DriftPolicy, DriftRecord,
    },
    connectors::{
        Exchange, FeeProvider, TransferCollaborator, TransferQuote,
    },
    data::{Asset, MarketView, Money},
    strategy::{Opportunity, TriangularScanner},
    EngineError, Result,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FlatFee(Decimal);

impl FeeProvider for FlatFee {
    fn effective_fee(&self, _exchange: Exchange, _trade_value: Money) -> Decimal {
        self.0
    }
}

/// Transfer double that counts executions and can be told to fail
struct RecordingTransfer {
    fee: Decimal,
    fail: bool,
    executed: AtomicUsize,
}

impl RecordingTransfer {
    fn new(fee: Decimal, fail: bool) -> Self {
        Self {
            fee,
            fail,
            executed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TransferCollaborator for RecordingTransfer {
    fn get_transfer_fee(
        &self,
        _from: Exchange,
        _to: Exchange,
        _amount: Money,
    ) -> Option<TransferQuote> {
        Some(TransferQuote {
            fee: Money::new(self.fee, Asset::USD),
            network: "SOL".to_string(),
        })
    }

    async fn execute_transfer(
        &self,
        _asset: Asset,
        from: Exchange,
        _to: Exchange,
        _amount: Money,
        _network: &str,
    ) -> Result<()> {
        if self.fail {
            return Err(EngineError::Timeout {
                exchange: from,
                operation: "withdraw".to_string(),
            }
            .into());
        }
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Conversion double that counts what it executes
struct RecordingConversion(AtomicUsize);

#[async_trait]
impl ConversionExecutor for RecordingConversion {
    async fn execute_conversion(&self, _opportunity: &Opportunity) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn controller() -> DriftController {
    DriftController::new(
        DriftPolicy::default(),
        ConversionManager::new(TriangularScanner::new(dec!(1000), dec!(2.5)), dec!(-0.002)),
    )
}

fn drift_record(asset: Asset, deviation: Decimal) -> DriftRecord {
    DriftRecord {
        asset,
        current_pct: dec!(0.5) + deviation,
        target_pct: dec!(0.5),
        deviation,
    }
}

#[tokio::test]
async fn scenario_d_concurrent_reserves_cannot_both_win() {
    let allocator = Arc::new(CapitalAllocator::new());
    allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(1000));

    let a = Arc::clone(&allocator);
    let b = Arc::clone(&allocator);
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { a.reserve(Exchange::Binance, Asset::USDT, dec!(600)) }),
        tokio::spawn(async move { b.reserve(Exchange::Binance, Asset::USDT, dec!(600)) }),
    );
    let results = [r1.unwrap(), r2.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);

    // Whatever the interleaving, at most 600 of the 1000 is held.
    let balance = allocator.balance(Exchange::Binance, Asset::USDT);
    assert_eq!(balance.reserved, dec!(600));
    assert_eq!(balance.free, dec!(400));
}

#[tokio::test]
async fn reservation_sum_never_exceeds_starting_free() {
    let allocator = Arc::new(CapitalAllocator::new());
    let starting_free = dec!(1000);
    allocator.sync_balance(Exchange::Kraken, Asset::USDT, starting_free);

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let alloc = Arc::clone(&allocator);
        tasks.push(tokio::spawn(async move {
            alloc
                .reserve(Exchange::Kraken, Asset::USDT, dec!(90))
                .is_ok()
        }));
    }
    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap() {
            successes += 1;
        }
    }
    // 90 * 11 = 990 <= 1000 < 90 * 12: exactly 11 can win.
    assert_eq!(successes, 11);
    let balance = allocator.balance(Exchange::Kraken, Asset::USDT);
    assert_eq!(balance.reserved, dec!(990));
    assert_eq!(balance.free, dec!(10));
}

#[tokio::test]
async fn scenario_c_critical_drift_forces_transfer_over_cheaper_conversion() {
    let allocator = CapitalAllocator::new();
    allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(4000));
    allocator.sync_balance(Exchange::Kraken, Asset::USDT, dec!(1000));

    // Expensive transfer, cheap conversion estimate; 40% drift forces the
    // transfer anyway.
    let transfer = RecordingTransfer::new(dec!(5), false);
    let conversion = RecordingConversion(AtomicUsize::new(0));

    let outcomes = controller()
        .resolve(
            &[drift_record(Asset::USDT, dec!(0.40))],
            &MarketView::default(),
            &allocator,
            &FlatFee(dec!(0.001)),
            &transfer,
            &conversion,
        )
        .await;

    assert_eq!(
        outcomes,
        vec![(Asset::USDT, DriftOutcome::TransferredExternally)]
    );
    assert_eq!(transfer.executed.load(Ordering::SeqCst), 1);
    assert_eq!(conversion.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_drift_correction_is_reported_not_hidden() {
    let allocator = CapitalAllocator::new();
    allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(4000));
    allocator.sync_balance(Exchange::Kraken, Asset::USDT, dec!(1000));

    // Transfer always fails and the empty market has no conversion route.
    let transfer = RecordingTransfer::new(dec!(0.10), true);
    let conversion = RecordingConversion(AtomicUsize::new(0));

    let outcomes = controller()
        .resolve(
            &[drift_record(Asset::USDT, dec!(0.20))],
            &MarketView::default(),
            &allocator,
            &FlatFee(dec!(0.001)),
            &transfer,
            &conversion,
        )
        .await;

    assert_eq!(outcomes, vec![(Asset::USDT, DriftOutcome::NoActionTaken)]);
}

#[test]
fn capital_mode_recomputes_from_drift_and_reserves() {
    let mut targets = BTreeMap::new();
    targets.insert(Asset::BTC, dec!(0.50));
    targets.insert(Asset::USDT, dec!(0.50));

    // Balanced book.
    let drift = compute_drift(
        &[(Asset::BTC, dec!(0.52)), (Asset::USDT, dec!(0.48))],
        &targets,
    );
    let max_dev = drift.iter().map(|d| d.magnitude()).max().unwrap();
    assert_eq!(
        CapitalMode::compute(max_dev, dec!(5000), dec!(0.15), dec!(1500)),
        CapitalMode::Balanced
    );

    // Drifted book.
    let drift = compute_drift(
        &[(Asset::BTC, dec!(0.70)), (Asset::USDT, dec!(0.30))],
        &targets,
    );
    let max_dev = drift.iter().map(|d| d.magnitude()).max().unwrap();
    assert_eq!(
        CapitalMode::compute(max_dev, dec!(5000), dec!(0.15), dec!(1500)),
        CapitalMode::Bottlenecked
    );
}
