//! Market data types: exact money, order books, and the per-cycle view

pub mod market;
pub mod money;
pub mod orderbook;

pub use market::{BookCache, BookKey, MarketView};
pub use money::{Asset, Money, MoneyError, Pair};
pub use orderbook::{OrderBookLevel, OrderBookSnapshot};
