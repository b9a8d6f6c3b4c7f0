//! Trade execution

pub mod executor;

pub use executor::OpportunityExecutor;
