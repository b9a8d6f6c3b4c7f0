//! Collaborator traits the engine core calls through.
//!
//! Everything behind these traits is out of the core's scope: protocol
//! plumbing, signing, persistence internals and transfer rails live in the
//! adapter layer. The core only sees normalized types.

use crate::{
    connectors::Exchange,
    data::{Asset, Money, OrderBookSnapshot, Pair},
    strategy::Opportunity,
    Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Order accepted, no fills yet
    New,
    /// Order partially filled
    PartiallyFilled,
    /// Order fully filled
    Filled,
    /// Order canceled
    Canceled,
    /// Order rejected
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Canceled => write!(f, "CANCELED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Result of an order placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    /// Exchange order ID
    pub order_id: String,
    /// Pair the order was placed on
    pub pair: Pair,
    /// Order side
    pub side: OrderSide,
    /// Requested base quantity
    pub quantity: Decimal,
    /// Requested limit price
    pub price: Decimal,
    /// Final status
    pub status: OrderStatus,
    /// Base quantity actually filled
    pub filled_quantity: Decimal,
    /// Average fill price, when anything filled
    pub average_price: Option<Decimal>,
    /// Placement timestamp
    pub timestamp: DateTime<Utc>,
}

impl OrderResult {
    /// Whether the order filled completely
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

/// Normalized exchange adapter.
///
/// All operations are fallible; errors must identify the exchange. A
/// timeout or failure on one adapter degrades scan coverage for that
/// exchange only.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange this adapter fronts
    fn exchange(&self) -> Exchange;

    /// Fetch an order book snapshot with the given depth
    async fn get_order_book(&self, pair: Pair, depth: usize) -> Result<OrderBookSnapshot>;

    /// Fetch the free balance of one asset
    async fn get_balance(&self, asset: Asset) -> Result<Money>;

    /// Place a limit order
    async fn place_order(
        &self,
        pair: Pair,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> Result<OrderResult>;

    /// Cancel an order by exchange ID
    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    /// Pairs tradable on this exchange
    async fn get_supported_pairs(&self) -> Result<Vec<Pair>>;
}

/// Effective trading fee lookup
#[cfg_attr(test, mockall::automock)]
pub trait FeeProvider: Send + Sync {
    /// Effective taker fee rate (0..1) for a trade of the given quote value
    fn effective_fee(&self, exchange: Exchange, trade_value: Money) -> Decimal;
}

/// Overall system health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Everything nominal
    Healthy,
    /// Elevated latency or partial outages
    Degraded,
    /// Serious failures; thresholds tighten and cycles slow down
    Critical,
}

/// Performance metrics attached to a health report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Standard deviation of recent scan-cycle durations, seconds
    pub std_cycle_time: f64,
    /// Mean scan-cycle duration, seconds
    pub mean_cycle_time: f64,
}

/// Health snapshot consumed by the threshold policy and the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall classification
    pub overall: HealthStatus,
    /// Timing metrics
    pub performance: PerformanceMetrics,
}

/// Health signal source
#[cfg_attr(test, mockall::automock)]
pub trait HealthProvider: Send + Sync {
    /// Current health snapshot
    fn get_health_status(&self) -> HealthReport;
}

/// A persisted trade record, serializable for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Opportunity that was executed
    pub opportunity: Opportunity,
    /// Whether every leg confirmed filled
    pub success: bool,
    /// Realized quote profit when known
    pub realized_profit: Option<Money>,
    /// Completion timestamp
    pub timestamp: DateTime<Utc>,
}

/// Portfolio snapshot for persistence hand-off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Total portfolio value in USD terms
    pub total_value_usd: Decimal,
    /// Per-asset USD values
    pub asset_values: Vec<(Asset, Decimal)>,
    /// Snapshot timestamp
    pub timestamp: DateTime<Utc>,
}

/// External persistence collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceCollaborator: Send + Sync {
    /// Persist a completed (or failed) trade
    async fn save_trade(&self, record: TradeRecord) -> Result<()>;

    /// Load the last persisted portfolio state, if any
    async fn load_last_state(&self) -> Result<Option<PortfolioSnapshot>>;

    /// Persist the portfolio state together with the trading mode label
    async fn update_portfolio_state(&self, portfolio: PortfolioSnapshot, mode: &str) -> Result<()>;
}

/// A quoted transfer route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferQuote {
    /// Flat fee in USD terms
    pub fee: Money,
    /// Network the quote is for
    pub network: String,
}

/// Cross-exchange transfer collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferCollaborator: Send + Sync {
    /// Cheapest viable transfer route between two exchanges for an amount
    fn get_transfer_fee(&self, from: Exchange, to: Exchange, amount: Money) -> Option<TransferQuote>;

    /// Execute a transfer over the given network
    async fn execute_transfer(
        &self,
        asset: Asset,
        from: Exchange,
        to: Exchange,
        amount: Money,
        network: &str,
    ) -> Result<()>;
}

/// Trading mode, externally driven by the signal layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    /// Capital weighted toward arbitrage
    BtcMode,
    /// Capital weighted toward gold hedging
    GoldMode,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::BtcMode => write!(f, "BTC"),
            TradingMode::GoldMode => write!(f, "GOLD"),
        }
    }
}

/// Source of the current trading mode. The core never sets the mode; it
/// only reads it and reports portfolio value back at switch time.
#[cfg_attr(test, mockall::automock)]
pub trait ModeProvider: Send + Sync {
    /// Currently active trading mode
    fn current_mode(&self) -> TradingMode;
}

/// Mode provider pinned to a single mode, for deployments without a signal
/// feed and for dry runs
#[derive(Debug, Clone, Copy)]
pub struct FixedModeProvider(pub TradingMode);

impl ModeProvider for FixedModeProvider {
    fn current_mode(&self) -> TradingMode {
        self.0
    }
}
