//! Detected arbitrage opportunities

use crate::{
    connectors::Exchange,
    data::{Money, Pair},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An arbitrage opportunity emitted by a scanner.
///
/// Only opportunities whose net profit met the threshold at detection time
/// are ever constructed; callers rank them and execute at most one
/// cross-exchange opportunity per scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Opportunity {
    /// Buy on one exchange, simultaneously sell on another
    CrossExchange {
        /// Pair being arbitraged
        pair: Pair,
        /// Exchange to buy on
        buy_exchange: Exchange,
        /// Exchange to sell on
        sell_exchange: Exchange,
        /// Best ask on the buy exchange
        buy_price: Decimal,
        /// Best bid on the sell exchange
        sell_price: Decimal,
        /// Quote value committed to the trade
        trade_value: Money,
        /// Net profit as a fraction of trade value
        net_profit_pct: Decimal,
        /// Detection timestamp
        timestamp: DateTime<Utc>,
    },
    /// Three-leg cycle on a single exchange
    Triangular {
        /// Exchange the cycle runs on
        exchange: Exchange,
        /// The three legs in execution order
        leg_pairs: [Pair; 3],
        /// Compounded cross-rate minus one, before fees
        gross_profit_pct: Decimal,
        /// Gross minus per-leg fees
        net_profit_pct: Decimal,
        /// Quote value committed to the first leg
        trade_value: Money,
        /// Detection timestamp
        timestamp: DateTime<Utc>,
    },
}

impl Opportunity {
    /// Net profit percentage, whichever variant
    pub fn net_profit_pct(&self) -> Decimal {
        match self {
            Opportunity::CrossExchange { net_profit_pct, .. } => *net_profit_pct,
            Opportunity::Triangular { net_profit_pct, .. } => *net_profit_pct,
        }
    }

    /// Committed trade value, whichever variant
    pub fn trade_value(&self) -> Money {
        match self {
            Opportunity::CrossExchange { trade_value, .. } => *trade_value,
            Opportunity::Triangular { trade_value, .. } => *trade_value,
        }
    }

    /// Short human label for logs
    pub fn describe(&self) -> String {
        match self {
            Opportunity::CrossExchange {
                pair,
                buy_exchange,
                sell_exchange,
                net_profit_pct,
                ..
            } => format!(
                "cross {} {}->{} net {:.4}%",
                pair,
                buy_exchange,
                sell_exchange,
                net_profit_pct * Decimal::ONE_HUNDRED
            ),
            Opportunity::Triangular {
                exchange,
                leg_pairs,
                net_profit_pct,
                ..
            } => format!(
                "tri {} {}>{}>{} net {:.4}%",
                exchange,
                leg_pairs[0],
                leg_pairs[1],
                leg_pairs[2],
                net_profit_pct * Decimal::ONE_HUNDRED
            ),
        }
    }
}
