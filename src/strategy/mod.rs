//! Opportunity detection: profit model, thresholds, and scanners

pub mod cross_exchange;
pub mod opportunity;
pub mod profit;
pub mod threshold;
pub mod triangular;

pub use cross_exchange::CrossExchangeScanner;
pub use opportunity::Opportunity;
pub use profit::{ProfitInputs, ProfitModel, MIN_PROFIT_THRESHOLD};
pub use threshold::ThresholdPolicy;
pub use triangular::{CyclePath, TriangularScanner, MAX_CYCLE_CURRENCIES};
