//! Exchange collaborator interfaces and implementations

pub mod fees;
pub mod paper;
pub mod traits;
pub mod transfer;

pub use fees::ConfigFeeProvider;
pub use paper::{MemoryPersistence, PaperConfig, PaperExchange};
pub use traits::*;
pub use transfer::StaticTransferTable;

use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// Binance exchange
    Binance,
    /// Bybit exchange
    Bybit,
    /// Kraken exchange
    Kraken,
    /// Coinbase exchange
    Coinbase,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Binance => write!(f, "binance"),
            Exchange::Bybit => write!(f, "bybit"),
            Exchange::Kraken => write!(f, "kraken"),
            Exchange::Coinbase => write!(f, "coinbase"),
        }
    }
}

impl std::str::FromStr for Exchange {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "bybit" => Ok(Exchange::Bybit),
            "kraken" => Ok(Exchange::Kraken),
            "coinbase" => Ok(Exchange::Coinbase),
            _ => Err(EngineError::Config(format!("Unknown exchange: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_from_str() {
        assert_eq!("binance".parse::<Exchange>().unwrap(), Exchange::Binance);
        assert_eq!("KRAKEN".parse::<Exchange>().unwrap(), Exchange::Kraken);
        assert_eq!("coinbase".parse::<Exchange>().unwrap(), Exchange::Coinbase);
        assert!("unknown".parse::<Exchange>().is_err());
    }

    #[test]
    fn test_exchange_display() {
        assert_eq!(Exchange::Binance.to_string(), "binance");
        assert_eq!(Exchange::Bybit.to_string(), "bybit");
    }

    #[test]
    fn test_ordering_is_stable() {
        // Reservation code relies on a fixed total order over exchanges.
        let mut exchanges = vec![
            Exchange::Coinbase,
            Exchange::Binance,
            Exchange::Kraken,
            Exchange::Bybit,
        ];
        exchanges.sort();
        assert_eq!(
            exchanges,
            vec![
                Exchange::Binance,
                Exchange::Bybit,
                Exchange::Kraken,
                Exchange::Coinbase
            ]
        );
    }
}
