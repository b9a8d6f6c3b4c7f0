//! Shared capital pool with race-free reservations.
//!
//! Balances are keyed by (exchange, asset). `reserve`, `commit` and
//! `release` on one key are linearizable: the map grants exclusive access
//! per key, so two concurrent reservations can never both succeed when
//! their sum exceeds the free balance.

use crate::{
    capital::CapitalSource,
    connectors::Exchange,
    data::{Asset, MarketView, Money, Pair},
    EngineError,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Key of one balance bucket
pub type BalanceKey = (Exchange, Asset);

/// A mirrored exchange balance split into free and reserved portions.
///
/// `free + reserved == total` by construction; `free` never goes negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Amount available for new reservations
    pub free: Decimal,
    /// Amount earmarked by in-flight opportunities
    pub reserved: Decimal,
}

impl AccountBalance {
    /// Total balance
    pub fn total(&self) -> Decimal {
        self.free + self.reserved
    }
}

/// A hold on a balance amount. Consumed exactly once by
/// [`CapitalAllocator::commit`] or [`CapitalAllocator::release`].
#[derive(Debug)]
pub struct ReservationHandle {
    id: Uuid,
    /// Exchange the hold is on
    pub exchange: Exchange,
    /// Asset held
    pub asset: Asset,
    /// Amount held
    pub amount: Decimal,
}

/// Owner of all mirrored balances.
///
/// Created at startup and injected into every component that sizes or
/// executes trades; there is no ambient global state.
#[derive(Debug, Default)]
pub struct CapitalAllocator {
    balances: DashMap<BalanceKey, AccountBalance>,
}

impl CapitalAllocator {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
        }
    }

    /// Replace the free balance for a key from an external fetch,
    /// preserving any outstanding reservation
    pub fn sync_balance(&self, exchange: Exchange, asset: Asset, fetched_free: Decimal) {
        let mut entry = self.balances.entry((exchange, asset)).or_default();
        if fetched_free < Decimal::ZERO {
            warn!(
                exchange = %exchange,
                asset = %asset,
                "negative balance fetch ignored"
            );
            return;
        }
        entry.free = fetched_free;
    }

    /// Current balance for a key
    pub fn balance(&self, exchange: Exchange, asset: Asset) -> AccountBalance {
        self.balances
            .get(&(exchange, asset))
            .map(|b| *b)
            .unwrap_or_default()
    }

    /// Atomically move `amount` from free to reserved, returning a handle.
    ///
    /// Fails with `InsufficientFunds` when the free balance cannot cover
    /// the request; the caller skips the opportunity for this cycle.
    pub fn reserve(
        &self,
        exchange: Exchange,
        asset: Asset,
        amount: Decimal,
    ) -> Result<ReservationHandle, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "reservation amount must be positive, got {}",
                amount
            )));
        }
        let mut entry = self.balances.entry((exchange, asset)).or_default();
        if entry.free < amount {
            return Err(EngineError::InsufficientFunds {
                exchange,
                asset,
                requested: amount,
                free: entry.free,
            });
        }
        entry.free -= amount;
        entry.reserved += amount;
        let handle = ReservationHandle {
            id: Uuid::new_v4(),
            exchange,
            asset,
            amount,
        };
        debug!(
            reservation = %handle.id,
            exchange = %exchange,
            asset = %asset,
            amount = %amount,
            "reserved"
        );
        Ok(handle)
    }

    /// Acquire two reservations for the legs of one opportunity.
    ///
    /// Keys are acquired in a fixed global order so concurrently executing
    /// opportunities cannot deadlock; if the second hold fails the first is
    /// released before returning. Handles come back in request order.
    pub fn reserve_pair(
        &self,
        first: (Exchange, Asset, Decimal),
        second: (Exchange, Asset, Decimal),
    ) -> Result<(ReservationHandle, ReservationHandle), EngineError> {
        let first_key = (first.0, first.1);
        let second_key = (second.0, second.1);

        let (lead, trail, swapped) = if first_key <= second_key {
            (first, second, false)
        } else {
            (second, first, true)
        };

        let lead_handle = self.reserve(lead.0, lead.1, lead.2)?;
        let trail_handle = match self.reserve(trail.0, trail.1, trail.2) {
            Ok(h) => h,
            Err(e) => {
                self.release(lead_handle);
                return Err(e);
            }
        };

        if swapped {
            Ok((trail_handle, lead_handle))
        } else {
            Ok((lead_handle, trail_handle))
        }
    }

    /// Finalize a reservation after the external trade confirmed; the
    /// amount leaves the balance entirely
    pub fn commit(&self, handle: ReservationHandle) -> Result<(), EngineError> {
        let mut entry = self.balances.entry((handle.exchange, handle.asset)).or_default();
        if entry.reserved < handle.amount {
            // Reserved accounting can only break through an internal bug;
            // this is not recoverable mid-cycle.
            return Err(EngineError::Validation(format!(
                "reservation {} commits {} but only {} is reserved on {}/{}",
                handle.id, handle.amount, entry.reserved, handle.exchange, handle.asset
            )));
        }
        entry.reserved -= handle.amount;
        debug!(reservation = %handle.id, "committed");
        Ok(())
    }

    /// Return a reserved amount to the free pool after a failed or
    /// abandoned execution
    pub fn release(&self, handle: ReservationHandle) {
        let mut entry = self.balances.entry((handle.exchange, handle.asset)).or_default();
        let returned = handle.amount.min(entry.reserved);
        if returned < handle.amount {
            warn!(
                reservation = %handle.id,
                "release clamped: reserved accounting drifted"
            );
        }
        entry.reserved -= returned;
        entry.free += returned;
        debug!(reservation = %handle.id, "released");
    }

    /// Credit a freshly acquired amount directly to the free pool
    /// (e.g. proceeds of a confirmed trade leg)
    pub fn deposit(&self, exchange: Exchange, asset: Asset, amount: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        let mut entry = self.balances.entry((exchange, asset)).or_default();
        entry.free += amount;
    }

    /// Total free value of stable assets across all exchanges, USD terms
    pub fn total_stable_value(&self) -> Decimal {
        self.balances
            .iter()
            .filter(|entry| entry.key().1.is_stable())
            .map(|entry| entry.value().total())
            .sum()
    }

    /// Value every balance in USD terms using best bids from the view.
    ///
    /// Stables count at par. Other assets are priced off the best bid of
    /// the first ASSET/stable book found; assets with no usable book are
    /// skipped (they simply don't contribute this cycle).
    pub fn portfolio_values(&self, view: &MarketView) -> Vec<(Asset, Decimal)> {
        let mut values: std::collections::BTreeMap<Asset, Decimal> = Default::default();
        for entry in self.balances.iter() {
            let (exchange, asset) = *entry.key();
            let total = entry.value().total();
            if total <= Decimal::ZERO {
                continue;
            }
            let value = if asset.is_stable() {
                Some(total)
            } else {
                Self::price_in_usd(view, exchange, asset).map(|p| p * total)
            };
            if let Some(value) = value {
                *values.entry(asset).or_default() += value;
            }
        }
        values.into_iter().collect()
    }

    /// Sum of all valued balances in USD terms
    pub fn total_value_usd(&self, view: &MarketView) -> Decimal {
        self.portfolio_values(view).iter().map(|(_, v)| *v).sum()
    }

    /// Current allocation percentage per asset
    pub fn current_allocations(&self, view: &MarketView) -> Vec<(Asset, Decimal)> {
        let values = self.portfolio_values(view);
        let total: Decimal = values.iter().map(|(_, v)| *v).sum();
        if total <= Decimal::ZERO {
            return Vec::new();
        }
        values.into_iter().map(|(a, v)| (a, v / total)).collect()
    }

    fn price_in_usd(view: &MarketView, exchange: Exchange, asset: Asset) -> Option<Decimal> {
        for stable in [Asset::USDT, Asset::USDC, Asset::USD] {
            if let Ok(pair) = Pair::new(asset, stable) {
                if let Some(bid) = view.book(exchange, pair).and_then(|b| b.best_bid()) {
                    return Some(bid);
                }
            }
        }
        // Fall back to any exchange quoting the asset against a stable.
        for stable in [Asset::USDT, Asset::USDC, Asset::USD] {
            if let Ok(pair) = Pair::new(asset, stable) {
                for ex in view.exchanges_with(pair) {
                    if let Some(bid) = view.book(ex, pair).and_then(|b| b.best_bid()) {
                        return Some(bid);
                    }
                }
            }
        }
        None
    }
}

impl CapitalSource for CapitalAllocator {
    fn available(&self, exchange: Exchange, asset: Asset) -> Money {
        Money::new(self.balance(exchange, asset).free, asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[test]
    fn test_reserve_commit_lifecycle() {
        let allocator = CapitalAllocator::new();
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(1000));

        let handle = allocator
            .reserve(Exchange::Binance, Asset::USDT, dec!(400))
            .unwrap();
        let bal = allocator.balance(Exchange::Binance, Asset::USDT);
        assert_eq!(bal.free, dec!(600));
        assert_eq!(bal.reserved, dec!(400));
        assert_eq!(bal.total(), dec!(1000));

        allocator.commit(handle).unwrap();
        let bal = allocator.balance(Exchange::Binance, Asset::USDT);
        assert_eq!(bal.free, dec!(600));
        assert_eq!(bal.reserved, dec!(0));
        assert_eq!(bal.total(), dec!(600));
    }

    #[test]
    fn test_release_returns_funds() {
        let allocator = CapitalAllocator::new();
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(1000));

        let handle = allocator
            .reserve(Exchange::Binance, Asset::USDT, dec!(400))
            .unwrap();
        allocator.release(handle);
        let bal = allocator.balance(Exchange::Binance, Asset::USDT);
        assert_eq!(bal.free, dec!(1000));
        assert_eq!(bal.reserved, dec!(0));
    }

    #[test]
    fn test_insufficient_funds() {
        let allocator = CapitalAllocator::new();
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(100));
        let err = allocator
            .reserve(Exchange::Binance, Asset::USDT, dec!(200))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_scenario_d_exactly_one_of_two_competing_reserves_wins() {
        let allocator = Arc::new(CapitalAllocator::new());
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(1000));

        let a = Arc::clone(&allocator);
        let b = Arc::clone(&allocator);
        let t1 = std::thread::spawn(move || a.reserve(Exchange::Binance, Asset::USDT, dec!(600)));
        let t2 = std::thread::spawn(move || b.reserve(Exchange::Binance, Asset::USDT, dec!(600)));
        let results = [t1.join().unwrap(), t2.join().unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let failures = results
            .iter()
            .filter(|r| {
                matches!(
                    r.as_ref().err(),
                    Some(EngineError::InsufficientFunds { .. })
                )
            })
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_concurrent_reserve_stress_never_oversubscribes() {
        let allocator = Arc::new(CapitalAllocator::new());
        allocator.sync_balance(Exchange::Kraken, Asset::USDT, dec!(1000));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let alloc = Arc::clone(&allocator);
            handles.push(std::thread::spawn(move || {
                let mut won = Decimal::ZERO;
                for _ in 0..50 {
                    if let Ok(h) = alloc.reserve(Exchange::Kraken, Asset::USDT, dec!(70)) {
                        won += h.amount;
                        // Hold briefly, then release so other threads race.
                        std::thread::yield_now();
                        alloc.release(h);
                    }
                }
                won
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // After every hold was released the pool must be exactly whole.
        let bal = allocator.balance(Exchange::Kraken, Asset::USDT);
        assert_eq!(bal.free, dec!(1000));
        assert_eq!(bal.reserved, dec!(0));
    }

    #[test]
    fn test_reserve_pair_rolls_back_on_second_failure() {
        let allocator = CapitalAllocator::new();
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(1000));
        allocator.sync_balance(Exchange::Kraken, Asset::BTC, dec!(0.001));

        let err = allocator
            .reserve_pair(
                (Exchange::Binance, Asset::USDT, dec!(500)),
                (Exchange::Kraken, Asset::BTC, dec!(1)),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        // First leg hold was rolled back.
        let bal = allocator.balance(Exchange::Binance, Asset::USDT);
        assert_eq!(bal.free, dec!(1000));
        assert_eq!(bal.reserved, dec!(0));
    }

    #[test]
    fn test_reserve_pair_handles_in_request_order() {
        let allocator = CapitalAllocator::new();
        allocator.sync_balance(Exchange::Kraken, Asset::USDT, dec!(1000));
        allocator.sync_balance(Exchange::Binance, Asset::BTC, dec!(2));

        // Request order is (kraken, binance); global key order is the
        // reverse. Handles must still come back in request order.
        let (first, second) = allocator
            .reserve_pair(
                (Exchange::Kraken, Asset::USDT, dec!(500)),
                (Exchange::Binance, Asset::BTC, dec!(1)),
            )
            .unwrap();
        assert_eq!(first.exchange, Exchange::Kraken);
        assert_eq!(second.exchange, Exchange::Binance);
        allocator.release(first);
        allocator.release(second);
    }

    #[test]
    fn test_sync_preserves_reservation() {
        let allocator = CapitalAllocator::new();
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(1000));
        let handle = allocator
            .reserve(Exchange::Binance, Asset::USDT, dec!(400))
            .unwrap();

        // A fresh fetch mirrors the venue's free balance; the hold stays.
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(550));
        let bal = allocator.balance(Exchange::Binance, Asset::USDT);
        assert_eq!(bal.free, dec!(550));
        assert_eq!(bal.reserved, dec!(400));
        allocator.release(handle);
    }

    #[test]
    fn test_zero_amount_reservation_rejected() {
        let allocator = CapitalAllocator::new();
        allocator.sync_balance(Exchange::Binance, Asset::USDT, dec!(1000));
        assert!(allocator
            .reserve(Exchange::Binance, Asset::USDT, Decimal::ZERO)
            .is_err());
    }
}
