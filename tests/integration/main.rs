//! Integration tests for the arbitrage engine

mod test_capital_allocation;
mod test_engine_cycle;
mod test_profit_model;

use arb_engine::{
    config::EngineConfig,
    connectors::Exchange,
    data::{Asset, OrderBookLevel, OrderBookSnapshot, Pair},
};
use chrono::Utc;
use rust_decimal::Decimal;

/// Test utilities shared across the integration suites
pub struct TestUtils;

impl TestUtils {
    /// Configuration trimmed to one pair over two venues
    pub fn create_test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.scanner.pairs = vec!["BTC/USDT".to_string()];
        config.scanner.derive_triangular_paths = false;
        config.scanner.triangular_paths = Vec::new();
        config.exchanges.enabled = vec!["binance".to_string(), "kraken".to_string()];
        config
    }

    /// Order book with five levels spaced 0.1% apart on each side
    pub fn create_test_orderbook(
        exchange: Exchange,
        pair: Pair,
        bid_price: Decimal,
        ask_price: Decimal,
        quantity: Decimal,
    ) -> OrderBookSnapshot {
        let step = rust_decimal_macros::dec!(0.001);
        let bids = (0..5)
            .map(|i| {
                OrderBookLevel::new(bid_price * (Decimal::ONE - step * Decimal::from(i)), quantity)
            })
            .collect();
        let asks = (0..5)
            .map(|i| {
                OrderBookLevel::new(ask_price * (Decimal::ONE + step * Decimal::from(i)), quantity)
            })
            .collect();
        OrderBookSnapshot::new(exchange, pair, bids, asks, Utc::now())
    }

    /// BTC/USDT pair used throughout
    pub fn btc_usdt() -> Pair {
        Pair::new(Asset::BTC, Asset::USDT).unwrap()
    }

    /// A pair of books with a clean profitable spread between two venues
    pub fn profitable_spread_books() -> (OrderBookSnapshot, OrderBookSnapshot) {
        let buy_venue = Self::create_test_orderbook(
            Exchange::Binance,
            Self::btc_usdt(),
            Decimal::from(49900),
            Decimal::from(50000),
            Decimal::from(100),
        );
        let sell_venue = Self::create_test_orderbook(
            Exchange::Kraken,
            Self::btc_usdt(),
            Decimal::from(50600),
            Decimal::from(50700),
            Decimal::from(100),
        );
        (buy_venue, sell_venue)
    }
}
