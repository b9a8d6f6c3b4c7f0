//! Read-mostly order book registry and per-cycle market views

use crate::{
    connectors::Exchange,
    data::{OrderBookSnapshot, Pair},
    Result,
};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Key for one order book in the registry
pub type BookKey = (Exchange, Pair);

/// Registry of the latest order book snapshot per (exchange, pair).
///
/// Feeds publish snapshots into the registry; scanners never read it
/// directly. Each scan cycle takes an immutable [`MarketView`] so scanning
/// logic operates on a consistent, non-mutating picture without locking.
#[derive(Debug, Default)]
pub struct BookCache {
    books: DashMap<BookKey, OrderBookSnapshot>,
}

impl BookCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    /// Publish a snapshot, replacing any previous one for the same key.
    ///
    /// Crossed or invalid snapshots are rejected here so stale data never
    /// reaches a scanner.
    pub fn publish(&self, snapshot: OrderBookSnapshot) -> Result<()> {
        snapshot.validate()?;
        debug!(
            exchange = %snapshot.exchange,
            pair = %snapshot.pair,
            "order book updated"
        );
        self.books
            .insert((snapshot.exchange, snapshot.pair), snapshot);
        Ok(())
    }

    /// Drop every book for an exchange (e.g. after a fetch timeout)
    pub fn evict_exchange(&self, exchange: Exchange) {
        self.books.retain(|(ex, _), _| *ex != exchange);
    }

    /// Drop a single book so a failed refresh cannot serve stale data
    pub fn evict(&self, exchange: Exchange, pair: Pair) {
        self.books.remove(&(exchange, pair));
    }

    /// Number of books currently held
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Whether the cache holds no books
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Take an immutable view of all books younger than `max_age_secs`.
    ///
    /// Books older than the age bound are left out of the view (and a
    /// warning is logged); the scan simply has reduced coverage that cycle.
    pub fn view(&self, max_age_secs: i64) -> MarketView {
        let cutoff = Utc::now() - Duration::seconds(max_age_secs);
        let mut books = HashMap::new();
        for entry in self.books.iter() {
            let snapshot = entry.value();
            if snapshot.timestamp < cutoff {
                warn!(
                    exchange = %snapshot.exchange,
                    pair = %snapshot.pair,
                    "stale order book excluded from view"
                );
                continue;
            }
            books.insert(*entry.key(), snapshot.clone());
        }
        MarketView { books }
    }
}

/// Immutable per-cycle view of the market.
///
/// Owned by the scan cycle that created it; scanners borrow it read-only.
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    books: HashMap<BookKey, OrderBookSnapshot>,
}

impl MarketView {
    /// Build a view directly from snapshots (test and replay entry point)
    pub fn from_snapshots(snapshots: Vec<OrderBookSnapshot>) -> Self {
        let mut books = HashMap::new();
        for snapshot in snapshots {
            books.insert((snapshot.exchange, snapshot.pair), snapshot);
        }
        Self { books }
    }

    /// Book for one (exchange, pair), if present in this view
    pub fn book(&self, exchange: Exchange, pair: Pair) -> Option<&OrderBookSnapshot> {
        self.books.get(&(exchange, pair))
    }

    /// Exchanges that currently have a book for `pair`
    pub fn exchanges_with(&self, pair: Pair) -> Vec<Exchange> {
        let mut exchanges: Vec<Exchange> = self
            .books
            .keys()
            .filter(|(_, p)| *p == pair)
            .map(|(ex, _)| *ex)
            .collect();
        exchanges.sort();
        exchanges.dedup();
        exchanges
    }

    /// Pairs present on a given exchange in this view
    pub fn pairs_on(&self, exchange: Exchange) -> Vec<Pair> {
        let mut pairs: Vec<Pair> = self
            .books
            .keys()
            .filter(|(ex, _)| *ex == exchange)
            .map(|(_, p)| *p)
            .collect();
        pairs.sort();
        pairs
    }

    /// Number of books in the view
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
