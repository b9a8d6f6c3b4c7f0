//! Shared capital: balances, reservations, allocation targets and drift

pub mod allocation;
pub mod allocator;
pub mod drift;

pub use allocation::{
    compute_drift, AllocationTarget, CapitalMode, DriftRecord, SPLIT_EPSILON,
};
pub use allocator::{AccountBalance, BalanceKey, CapitalAllocator, ReservationHandle};
pub use drift::{ConversionExecutor, ConversionManager, DriftController, DriftOutcome, DriftPolicy};

use crate::{
    connectors::Exchange,
    data::{Asset, Money},
};

/// Read-only view of available (free) capital per (exchange, asset).
///
/// Scanners size trades through this without being able to mutate
/// balances; only the allocator's reservation API moves funds.
pub trait CapitalSource: Send + Sync {
    /// Free balance for a key
    fn available(&self, exchange: Exchange, asset: Asset) -> Money;
}
