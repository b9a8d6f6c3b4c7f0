//! Config-driven effective fee lookup

use crate::{
    connectors::{Exchange, FeeProvider},
    data::Money,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fee schedule for one exchange
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Base taker fee rate (0..1)
    pub taker_fee: Decimal,
    /// Multiplier applied after venue discounts (1.0 = none,
    /// 0.5 = half fees, 0.0 = fee-free tier)
    pub discount_multiplier: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            taker_fee: dec!(0.001),
            discount_multiplier: Decimal::ONE,
        }
    }
}

impl FeeSchedule {
    /// Effective taker rate after discounts
    pub fn effective(&self) -> Decimal {
        self.taker_fee * self.discount_multiplier
    }
}

/// Fee provider backed by per-exchange schedules from configuration.
///
/// Unknown exchanges fall back to the default 0.1% taker rate.
#[derive(Debug, Clone, Default)]
pub struct ConfigFeeProvider {
    schedules: HashMap<Exchange, FeeSchedule>,
}

impl ConfigFeeProvider {
    /// Build from explicit schedules
    pub fn new(schedules: HashMap<Exchange, FeeSchedule>) -> Self {
        Self { schedules }
    }

    /// Insert or replace one schedule
    pub fn set(&mut self, exchange: Exchange, schedule: FeeSchedule) {
        self.schedules.insert(exchange, schedule);
    }
}

impl FeeProvider for ConfigFeeProvider {
    fn effective_fee(&self, exchange: Exchange, _trade_value: Money) -> Decimal {
        self.schedules
            .get(&exchange)
            .copied()
            .unwrap_or_default()
            .effective()
    }
}
