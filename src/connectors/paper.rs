//! Paper (simulated) exchange adapter for dry runs and tests

use crate::{
    connectors::{Exchange, ExchangeAdapter, OrderResult, OrderSide, OrderStatus},
    data::{Asset, Money, OrderBookSnapshot, Pair},
    EngineError, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Simulation knobs
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Fraction of each order that fills (1.0 = always full fills)
    pub fill_ratio: Decimal,
    /// Probability an order is rejected outright (0.0 to 1.0)
    pub rejection_probability: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fill_ratio: Decimal::ONE,
            rejection_probability: 0.0,
        }
    }
}

/// In-memory exchange simulation.
///
/// Books are seeded by the harness; orders fill against the limit price and
/// settle instantly into the simulated balances. Partial fills and
/// rejections are driven by [`PaperConfig`] so execution-path error
/// handling can be exercised deterministically.
pub struct PaperExchange {
    exchange: Exchange,
    config: PaperConfig,
    books: Arc<RwLock<HashMap<Pair, OrderBookSnapshot>>>,
    balances: Arc<RwLock<HashMap<Asset, Decimal>>>,
}

impl PaperExchange {
    /// Create a simulation of one exchange
    pub fn new(exchange: Exchange, config: PaperConfig) -> Self {
        Self {
            exchange,
            config,
            books: Arc::new(RwLock::new(HashMap::new())),
            balances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed or replace an order book
    pub async fn set_book(&self, book: OrderBookSnapshot) {
        self.books.write().await.insert(book.pair, book);
    }

    /// Seed a balance
    pub async fn set_balance(&self, asset: Asset, amount: Decimal) {
        self.balances.write().await.insert(asset, amount);
    }

    /// Adjust the fill ratio mid-simulation
    pub fn set_fill_ratio(&mut self, ratio: Decimal) {
        self.config.fill_ratio = ratio;
    }

    fn should_reject(&self) -> bool {
        self.config.rejection_probability > 0.0
            && rand::thread_rng().gen::<f64>() < self.config.rejection_probability
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn get_order_book(&self, pair: Pair, depth: usize) -> Result<OrderBookSnapshot> {
        let books = self.books.read().await;
        let book = books.get(&pair).ok_or(EngineError::DataUnavailable {
            exchange: self.exchange,
            reason: format!("no book for {}", pair),
        })?;
        let mut book = book.clone();
        book.bids.truncate(depth);
        book.asks.truncate(depth);
        book.timestamp = Utc::now();
        Ok(book)
    }

    async fn get_balance(&self, asset: Asset) -> Result<Money> {
        let balances = self.balances.read().await;
        Ok(Money::new(
            balances.get(&asset).copied().unwrap_or(Decimal::ZERO),
            asset,
        ))
    }

    async fn place_order(
        &self,
        pair: Pair,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> Result<OrderResult> {
        if amount <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "order amount and price must be positive: {} @ {}",
                amount, price
            ))
            .into());
        }
        if self.should_reject() {
            warn!(exchange = %self.exchange, pair = %pair, "simulated rejection");
            return Err(EngineError::Execution {
                exchange: self.exchange,
                reason: "order rejected in simulation".to_string(),
            }
            .into());
        }

        let filled = amount * self.config.fill_ratio;
        let notional = filled * price;

        {
            let mut balances = self.balances.write().await;
            match side {
                OrderSide::Buy => {
                    let quote = balances.entry(pair.quote).or_insert(Decimal::ZERO);
                    if *quote < notional {
                        return Err(EngineError::InsufficientFunds {
                            exchange: self.exchange,
                            asset: pair.quote,
                            requested: notional,
                            free: *quote,
                        }
                        .into());
                    }
                    *quote -= notional;
                    *balances.entry(pair.base).or_insert(Decimal::ZERO) += filled;
                }
                OrderSide::Sell => {
                    let base = balances.entry(pair.base).or_insert(Decimal::ZERO);
                    if *base < filled {
                        return Err(EngineError::InsufficientFunds {
                            exchange: self.exchange,
                            asset: pair.base,
                            requested: filled,
                            free: *base,
                        }
                        .into());
                    }
                    *base -= filled;
                    *balances.entry(pair.quote).or_insert(Decimal::ZERO) += notional;
                }
            }
        }

        let status = if filled == amount {
            OrderStatus::Filled
        } else if filled > Decimal::ZERO {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::New
        };

        info!(
            exchange = %self.exchange,
            pair = %pair,
            side = %side,
            filled = %filled,
            price = %price,
            "paper order executed"
        );

        Ok(OrderResult {
            order_id: Uuid::new_v4().to_string(),
            pair,
            side,
            quantity: amount,
            price,
            status,
            filled_quantity: filled,
            average_price: (filled > Decimal::ZERO).then_some(price),
            timestamp: Utc::now(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        // Paper fills settle instantly, so there is never anything to cancel.
        debug!(exchange = %self.exchange, order_id, "cancel is a no-op in paper mode");
        Ok(false)
    }

    async fn get_supported_pairs(&self) -> Result<Vec<Pair>> {
        let books = self.books.read().await;
        let mut pairs: Vec<Pair> = books.keys().copied().collect();
        pairs.sort();
        Ok(pairs)
    }
}

/// In-memory persistence used by dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    trades: RwLock<Vec<crate::connectors::TradeRecord>>,
    last_state: RwLock<Option<crate::connectors::PortfolioSnapshot>>,
}

impl MemoryPersistence {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Trades recorded so far
    pub async fn trades(&self) -> Vec<crate::connectors::TradeRecord> {
        self.trades.read().await.clone()
    }
}

#[async_trait]
impl crate::connectors::PersistenceCollaborator for MemoryPersistence {
    async fn save_trade(&self, record: crate::connectors::TradeRecord) -> Result<()> {
        self.trades.write().await.push(record);
        Ok(())
    }

    async fn load_last_state(&self) -> Result<Option<crate::connectors::PortfolioSnapshot>> {
        Ok(self.last_state.read().await.clone())
    }

    async fn update_portfolio_state(
        &self,
        portfolio: crate::connectors::PortfolioSnapshot,
        mode: &str,
    ) -> Result<()> {
        debug!(mode, total = %portfolio.total_value_usd, "portfolio state updated");
        *self.last_state.write().await = Some(portfolio);
        Ok(())
    }
}
