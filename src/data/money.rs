//! Exact monetary values tagged with their asset

use crate::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Assets the engine trades or holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    /// Bitcoin
    BTC,
    /// Ether
    ETH,
    /// Solana
    SOL,
    /// Pax Gold
    PAXG,
    /// US dollar
    USD,
    /// Tether
    USDT,
    /// USD Coin
    USDC,
    /// Global Dollar
    USDG,
}

impl Asset {
    /// Whether the asset is a stablecoin or fiat dollar
    pub fn is_stable(&self) -> bool {
        matches!(self, Asset::USD | Asset::USDT | Asset::USDC | Asset::USDG)
    }

    /// All assets the engine knows about
    pub fn all() -> &'static [Asset] {
        &[
            Asset::BTC,
            Asset::ETH,
            Asset::SOL,
            Asset::PAXG,
            Asset::USD,
            Asset::USDT,
            Asset::USDC,
            Asset::USDG,
        ]
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Asset::BTC => "BTC",
            Asset::ETH => "ETH",
            Asset::SOL => "SOL",
            Asset::PAXG => "PAXG",
            Asset::USD => "USD",
            Asset::USDT => "USDT",
            Asset::USDC => "USDC",
            Asset::USDG => "USDG",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Asset {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BTC" => Ok(Asset::BTC),
            "ETH" => Ok(Asset::ETH),
            "SOL" => Ok(Asset::SOL),
            "PAXG" => Ok(Asset::PAXG),
            "USD" => Ok(Asset::USD),
            "USDT" => Ok(Asset::USDT),
            "USDC" => Ok(Asset::USDC),
            "USDG" => Ok(Asset::USDG),
            _ => Err(EngineError::Validation(format!("Unknown asset: {}", s))),
        }
    }
}

/// A trading pair, base priced in quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair {
    /// Asset being bought or sold
    pub base: Asset,
    /// Asset it is priced in
    pub quote: Asset,
}

impl Pair {
    /// Create a pair; base and quote must differ
    pub fn new(base: Asset, quote: Asset) -> Result<Self, EngineError> {
        if base == quote {
            return Err(EngineError::Validation(format!(
                "Pair base and quote must differ: {}/{}",
                base, quote
            )));
        }
        Ok(Self { base, quote })
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl std::str::FromStr for Pair {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| EngineError::Validation(format!("Invalid pair format: {}", s)))?;
        Pair::new(base.parse()?, quote.parse()?)
    }
}

/// Errors from exact money arithmetic
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Two operands carried different asset tags
    #[error("Asset mismatch: {left} vs {right}")]
    AssetMismatch {
        /// Asset of the left operand
        left: Asset,
        /// Asset of the right operand
        right: Asset,
    },

    /// Division by a zero amount; a defined error, never a panic
    #[error("Division by zero in {asset} amount")]
    DivisionByZero {
        /// Asset of the zero divisor
        asset: Asset,
    },
}

/// A fixed-point monetary amount tagged with its asset.
///
/// All arithmetic is exact decimal; same-asset constraints are enforced at
/// runtime and division by zero is a defined error rather than a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    /// Exact amount
    pub amount: Decimal,
    /// Asset the amount is denominated in
    pub asset: Asset,
}

impl Money {
    /// Create a tagged amount
    pub fn new(amount: Decimal, asset: Asset) -> Self {
        Self { amount, asset }
    }

    /// Zero of the given asset
    pub fn zero(asset: Asset) -> Self {
        Self {
            amount: Decimal::ZERO,
            asset,
        }
    }

    /// Whether the amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Whether the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Add a same-asset amount
    pub fn checked_add(&self, other: Money) -> Result<Money, MoneyError> {
        self.require_same_asset(other)?;
        Ok(Money::new(self.amount + other.amount, self.asset))
    }

    /// Subtract a same-asset amount
    pub fn checked_sub(&self, other: Money) -> Result<Money, MoneyError> {
        self.require_same_asset(other)?;
        Ok(Money::new(self.amount - other.amount, self.asset))
    }

    /// Scale by a dimensionless rate (fee, slippage, percentage)
    pub fn mul_rate(&self, rate: Decimal) -> Money {
        Money::new(self.amount * rate, self.asset)
    }

    /// Ratio of two same-asset amounts; the result is a dimensionless rate
    pub fn checked_div(&self, other: Money) -> Result<Decimal, MoneyError> {
        self.require_same_asset(other)?;
        if other.amount.is_zero() {
            return Err(MoneyError::DivisionByZero { asset: other.asset });
        }
        Ok(self.amount / other.amount)
    }

    /// Smaller of two same-asset amounts
    pub fn min(&self, other: Money) -> Result<Money, MoneyError> {
        self.require_same_asset(other)?;
        Ok(if self.amount <= other.amount {
            *self
        } else {
            other
        })
    }

    fn require_same_asset(&self, other: Money) -> Result<(), MoneyError> {
        if self.asset != other.asset {
            return Err(MoneyError::AssetMismatch {
                left: self.asset,
                right: other.asset,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.asset)
    }
}
