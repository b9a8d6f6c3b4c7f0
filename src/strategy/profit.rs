//! Net profit arithmetic for candidate trades.
//!
//! All computation is exact decimal. Fees are charged on each leg's traded
//! notional, slippage on the post-fee result, and a minimum-margin floor
//! zeroes out anything below the configured threshold so the engine never
//! chases fee-noise-sized edges.

use crate::{
    data::{Asset, Money},
    EngineError, Result,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Baseline minimum net margin: 0.5% of the buy notional
pub const MIN_PROFIT_THRESHOLD: Decimal = dec!(0.005);

/// Inputs to a net-profit computation
#[derive(Debug, Clone, Copy)]
pub struct ProfitInputs {
    /// Price paid per unit on the buy side
    pub buy_price: Decimal,
    /// Price received per unit on the sell side
    pub sell_price: Decimal,
    /// Base quantity traded
    pub amount: Decimal,
    /// Buy-side fee rate (0..1)
    pub fee_buy: Decimal,
    /// Sell-side fee rate (0..1)
    pub fee_sell: Decimal,
    /// Slippage allowance as a rate (0..1)
    pub slippage_pct: Decimal,
    /// Flat transfer cost in quote terms
    pub transfer_cost: Decimal,
}

/// Exact profit model with a minimum-margin floor
#[derive(Debug, Clone, Copy)]
pub struct ProfitModel {
    min_profit_threshold: Decimal,
}

impl Default for ProfitModel {
    fn default() -> Self {
        Self {
            min_profit_threshold: MIN_PROFIT_THRESHOLD,
        }
    }
}

impl ProfitModel {
    /// Create a model with a custom margin floor
    pub fn new(min_profit_threshold: Decimal) -> Self {
        Self {
            min_profit_threshold,
        }
    }

    /// Gross profit before fees and slippage
    pub fn gross_profit(buy_price: Decimal, sell_price: Decimal, amount: Decimal) -> Decimal {
        (sell_price - buy_price) * amount
    }

    /// Deduct per-leg fees from gross, each charged on its leg's notional
    pub fn apply_fees(
        gross: Decimal,
        buy_price: Decimal,
        sell_price: Decimal,
        amount: Decimal,
        fee_buy: Decimal,
        fee_sell: Decimal,
    ) -> Decimal {
        gross - buy_price * amount * fee_buy - sell_price * amount * fee_sell
    }

    /// Net profit in the quote asset.
    ///
    /// Returns zero Money when the net margin is below the floor. Negative
    /// prices or amounts are rejected; a zero buy price or amount is a
    /// defined undefined-profit error, not an arithmetic fault.
    pub fn net_profit(&self, inputs: ProfitInputs, quote: Asset) -> Result<Money> {
        let ProfitInputs {
            buy_price,
            sell_price,
            amount,
            fee_buy,
            fee_sell,
            slippage_pct,
            transfer_cost,
        } = inputs;

        if buy_price < Decimal::ZERO || sell_price < Decimal::ZERO || amount < Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "negative profit input: buy={} sell={} amount={}",
                buy_price, sell_price, amount
            ))
            .into());
        }

        let notional = Money::new(buy_price * amount, quote);
        if notional.is_zero() {
            return Err(EngineError::Money(crate::data::MoneyError::DivisionByZero {
                asset: quote,
            })
            .into());
        }

        let gross = Self::gross_profit(buy_price, sell_price, amount);
        let after_fees = Self::apply_fees(gross, buy_price, sell_price, amount, fee_buy, fee_sell);
        let net = Money::new(
            after_fees - after_fees * slippage_pct - transfer_cost,
            quote,
        );

        // Margin floor: anything below the threshold is treated as not
        // profitable at all, never as a small positive edge.
        if net.checked_div(notional)? < self.min_profit_threshold {
            return Ok(Money::zero(quote));
        }

        Ok(net)
    }

    /// Net profit as a fraction of the buy notional, zero when floored
    pub fn net_profit_pct(&self, inputs: ProfitInputs, quote: Asset) -> Result<Decimal> {
        let net = self.net_profit(inputs, quote)?;
        let notional = Money::new(inputs.buy_price * inputs.amount, quote);
        Ok(net.checked_div(notional)?)
    }
}
