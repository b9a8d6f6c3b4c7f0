//! Multi-Exchange Arbitrage Engine
//!
//! Continuously scans order books across exchanges, detects cross-exchange and
//! triangular arbitrage opportunities net of fees, slippage and depth, sizes
//! trades against a shared capital pool, and drives execution while a
//! background health layer gates and monitors it off the hot path.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod capital;
pub mod config;
pub mod connectors;
pub mod data;
pub mod engine;
pub mod strategy;
pub mod trading;
pub mod utils;

// Re-export commonly used types
pub use capital::CapitalAllocator;
pub use config::EngineConfig;
pub use connectors::{Exchange, ExchangeAdapter};
pub use data::{Asset, Money, OrderBookSnapshot, Pair};
pub use engine::ArbitrageEngine;
pub use strategy::Opportunity;

/// Result type used throughout the application
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the arbitrage engine
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Configuration error, fatal at startup only
    #[error("Configuration error: {0}")]
    Config(String),

    /// Book or balance data missing/stale for an exchange; the exchange is
    /// excluded from the current cycle
    #[error("Data unavailable on {exchange}: {reason}")]
    DataUnavailable {
        /// Exchange the data was requested from
        exchange: connectors::Exchange,
        /// What was missing or stale
        reason: String,
    },

    /// Best bid at or above best ask, or a non-positive price; the snapshot
    /// is discarded
    #[error("Crossed or invalid book on {exchange} for {pair}")]
    CrossedBook {
        /// Exchange that produced the snapshot
        exchange: connectors::Exchange,
        /// Pair of the offending snapshot
        pair: data::Pair,
    },

    /// Reservation failed; the opportunity is skipped this cycle
    #[error("Insufficient funds on {exchange} for {asset}: requested {requested}, free {free}")]
    InsufficientFunds {
        /// Exchange holding the balance
        exchange: connectors::Exchange,
        /// Asset the reservation was attempted against
        asset: data::Asset,
        /// Amount requested
        requested: rust_decimal::Decimal,
        /// Amount actually free
        free: rust_decimal::Decimal,
    },

    /// Order placement rejected or failed; held reservations are released
    #[error("Execution failure on {exchange}: {reason}")]
    Execution {
        /// Exchange the order was sent to
        exchange: connectors::Exchange,
        /// Rejection or failure detail
        reason: String,
    },

    /// A triangular cycle failed after one or more legs filled; the partial
    /// state is surfaced for reconciliation, never auto-unwound
    #[error("Triangular cycle aborted on {exchange} after {filled_legs} filled leg(s)")]
    TriangularPartial {
        /// Exchange the cycle ran on
        exchange: connectors::Exchange,
        /// Number of legs confirmed filled before the failure
        filled_legs: usize,
        /// Fill quantities of the completed legs
        fills: Vec<rust_decimal::Decimal>,
    },

    /// Neither conversion nor transfer succeeded; retried next cycle
    #[error("Drift resolution failed for {asset}: {reason}")]
    DriftResolution {
        /// Asset whose allocation drifted
        asset: data::Asset,
        /// Why both correction paths failed
        reason: String,
    },

    /// Money arithmetic error (asset mismatch or division by zero)
    #[error("Money arithmetic error: {0}")]
    Money(#[from] data::MoneyError),

    /// Invalid input rejected before computation
    #[error("Validation error: {0}")]
    Validation(String),

    /// External call exceeded its deadline
    #[error("Timeout on {exchange}: {operation}")]
    Timeout {
        /// Exchange the call was issued to
        exchange: connectors::Exchange,
        /// Operation that timed out
        operation: String,
    },
}

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
