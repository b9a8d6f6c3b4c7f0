//! Allocation targets, drift records and the capital mode state machine

use crate::{
    connectors::TradingMode,
    data::Asset,
    EngineError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance for split sums; anything further from 1.0 is a config error
pub const SPLIT_EPSILON: Decimal = dec!(0.000001);

/// How a mode splits capital across the three buckets.
///
/// The splits must sum to 1 within [`SPLIT_EPSILON`]; this is validated at
/// startup and never re-checked mid-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTarget {
    /// Share of capital working arbitrage
    pub arbitrage_pct: Decimal,
    /// Share parked in staking
    pub staking_pct: Decimal,
    /// Share hedging in gold
    pub hedging_pct: Decimal,
}

impl AllocationTarget {
    /// Validate the splits sum to one
    pub fn validate(&self) -> Result<(), EngineError> {
        let sum = self.arbitrage_pct + self.staking_pct + self.hedging_pct;
        if (sum - Decimal::ONE).abs() > SPLIT_EPSILON {
            return Err(EngineError::Config(format!(
                "allocation splits must sum to 1.0, got {}",
                sum
            )));
        }
        if self.arbitrage_pct < Decimal::ZERO
            || self.staking_pct < Decimal::ZERO
            || self.hedging_pct < Decimal::ZERO
        {
            return Err(EngineError::Config(
                "allocation splits must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Default split for a trading mode
    pub fn for_mode(mode: TradingMode) -> Self {
        match mode {
            TradingMode::BtcMode => Self {
                arbitrage_pct: dec!(0.85),
                staking_pct: dec!(0.15),
                hedging_pct: dec!(0.0),
            },
            TradingMode::GoldMode => Self {
                arbitrage_pct: dec!(0.15),
                staking_pct: dec!(0.0),
                hedging_pct: dec!(0.85),
            },
        }
    }
}

/// One asset's allocation deviation, recomputed fresh every cycle.
///
/// The deviation is signed: positive is an excess over target, negative a
/// deficit. Magnitude gates the thresholds; the sign determines the
/// direction of any corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    /// Asset measured
    pub asset: Asset,
    /// Current allocation share of total portfolio value
    pub current_pct: Decimal,
    /// Target share
    pub target_pct: Decimal,
    /// current − target
    pub deviation: Decimal,
}

impl DriftRecord {
    /// Absolute deviation
    pub fn magnitude(&self) -> Decimal {
        self.deviation.abs()
    }
}

/// Compute per-asset drift against targets.
///
/// Every targeted asset produces a record even when the current holding is
/// zero; untargeted assets are measured against a zero target.
pub fn compute_drift(
    current: &[(Asset, Decimal)],
    targets: &BTreeMap<Asset, Decimal>,
) -> Vec<DriftRecord> {
    let current_map: BTreeMap<Asset, Decimal> = current.iter().copied().collect();
    let mut assets: Vec<Asset> = targets.keys().copied().collect();
    for asset in current_map.keys() {
        if !assets.contains(asset) {
            assets.push(*asset);
        }
    }
    assets.sort();

    assets
        .into_iter()
        .map(|asset| {
            let current_pct = current_map.get(&asset).copied().unwrap_or(Decimal::ZERO);
            let target_pct = targets.get(&asset).copied().unwrap_or(Decimal::ZERO);
            DriftRecord {
                asset,
                current_pct,
                target_pct,
                deviation: current_pct - target_pct,
            }
        })
        .collect()
}

/// Liquid-capital classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapitalMode {
    /// Allocations near target and stable reserves adequate
    Balanced,
    /// Drift past threshold or stable reserves below the floor
    Bottlenecked,
}

impl CapitalMode {
    /// Recompute the mode. No hysteresis beyond the recompute frequency;
    /// the mode flips as soon as either condition flips.
    pub fn compute(
        max_deviation: Decimal,
        total_stable_value: Decimal,
        drift_threshold: Decimal,
        bottleneck_floor: Decimal,
    ) -> Self {
        if max_deviation >= drift_threshold || total_stable_value < bottleneck_floor {
            CapitalMode::Bottlenecked
        } else {
            CapitalMode::Balanced
        }
    }
}

impl std::fmt::Display for CapitalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapitalMode::Balanced => write!(f, "balanced"),
            CapitalMode::Bottlenecked => write!(f, "bottlenecked"),
        }
    }
}
