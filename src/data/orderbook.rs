//! Order book snapshots and depth queries

use crate::{
    connectors::Exchange,
    data::{Money, Pair},
    EngineError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price level: price in quote, quantity in base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    /// Price in the pair's quote asset
    pub price: Decimal,
    /// Quantity in the pair's base asset
    pub quantity: Decimal,
}

impl OrderBookLevel {
    /// Create a level
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    /// Notional value of the level in quote terms
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Immutable order book snapshot for one (exchange, pair).
///
/// Bids are held in descending price order, asks ascending. Snapshots are
/// lent to scanners as read-only views; nothing downstream mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Exchange the snapshot came from
    pub exchange: Exchange,
    /// Pair the snapshot describes
    pub pair: Pair,
    /// Bid levels, descending price
    pub bids: Vec<OrderBookLevel>,
    /// Ask levels, ascending price
    pub asks: Vec<OrderBookLevel>,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Create a snapshot; levels are sorted into canonical order
    pub fn new(
        exchange: Exchange,
        pair: Pair,
        mut bids: Vec<OrderBookLevel>,
        mut asks: Vec<OrderBookLevel>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            exchange,
            pair,
            bids,
            asks,
            timestamp,
        }
    }

    /// Best (highest) bid price, skipping zero-quantity levels
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids
            .iter()
            .find(|l| l.quantity > Decimal::ZERO)
            .map(|l| l.price)
    }

    /// Best (lowest) ask price, skipping zero-quantity levels
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks
            .iter()
            .find(|l| l.quantity > Decimal::ZERO)
            .map(|l| l.price)
    }

    /// Quantity available at the best bid
    pub fn best_bid_quantity(&self) -> Option<Decimal> {
        self.bids
            .iter()
            .find(|l| l.quantity > Decimal::ZERO)
            .map(|l| l.quantity)
    }

    /// Quantity available at the best ask
    pub fn best_ask_quantity(&self) -> Option<Decimal> {
        self.asks
            .iter()
            .find(|l| l.quantity > Decimal::ZERO)
            .map(|l| l.quantity)
    }

    /// Mid price when both sides are present
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Notional quote volume across the top `depth` bid levels,
    /// zero-quantity levels skipped
    pub fn bid_volume(&self, depth: usize) -> Money {
        let total = self
            .bids
            .iter()
            .filter(|l| l.quantity > Decimal::ZERO)
            .take(depth)
            .map(|l| l.notional())
            .sum();
        Money::new(total, self.pair.quote)
    }

    /// Notional quote volume across the top `depth` ask levels,
    /// zero-quantity levels skipped
    pub fn ask_volume(&self, depth: usize) -> Money {
        let total = self
            .asks
            .iter()
            .filter(|l| l.quantity > Decimal::ZERO)
            .take(depth)
            .map(|l| l.notional())
            .sum();
        Money::new(total, self.pair.quote)
    }

    /// Reject crossed or invalid books.
    ///
    /// A snapshot whose best bid is at or above its best ask is stale or
    /// corrupt and must be discarded, not traded on. Non-positive prices on
    /// either side fail for the same reason.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid_price = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .any(|l| l.price <= Decimal::ZERO && l.quantity > Decimal::ZERO);
        if invalid_price {
            return Err(EngineError::CrossedBook {
                exchange: self.exchange,
                pair: self.pair,
            });
        }
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(EngineError::CrossedBook {
                    exchange: self.exchange,
                    pair: self.pair,
                });
            }
        }
        Ok(())
    }
}
