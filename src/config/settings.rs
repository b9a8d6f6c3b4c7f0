//! Settings management utilities

use crate::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

/// Environment variable expansion utility
pub struct EnvExpander;

impl EnvExpander {
    /// Expand environment variables in a string
    /// Supports ${VAR_NAME} patterns
    pub fn expand(input: &str) -> Result<String> {
        let mut result = input.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let var_value = env::var(var_name).map_err(|_| {
                    EngineError::Config(format!("Environment variable '{}' not found", var_name))
                })?;

                result.replace_range(start..start + end + 1, &var_value);
            } else {
                return Err(EngineError::Config(
                    "Unclosed environment variable reference".to_string(),
                )
                .into());
            }
        }

        Ok(result)
    }
}

/// Configuration validation utilities
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a rate value (0.0 to 1.0)
    pub fn validate_rate(value: Decimal, name: &str) -> Result<()> {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(
                EngineError::Config(format!("{} must be between 0.0 and 1.0", name)).into(),
            );
        }
        Ok(())
    }

    /// Validate a positive value
    pub fn validate_positive(value: Decimal, name: &str) -> Result<()> {
        if value <= Decimal::ZERO {
            return Err(EngineError::Config(format!("{} must be positive", name)).into());
        }
        Ok(())
    }
}

/// Configuration defaults
pub struct ConfigDefaults;

impl ConfigDefaults {
    /// Default hard cap on quote value per trade
    pub const MAX_TRADE_USD: Decimal = dec!(1000);

    /// Default required depth as a multiple of trade value
    pub const DEPTH_MULTIPLIER: Decimal = dec!(2.5);

    /// Default slippage allowance
    pub const SLIPPAGE_PCT: Decimal = dec!(0.001);

    /// Default allocation drift threshold (high-latency profile)
    pub const DRIFT_THRESHOLD: Decimal = dec!(0.15);

    /// Drift threshold for the low-latency profile
    pub const DRIFT_THRESHOLD_LOW_LATENCY: Decimal = dec!(0.10);

    /// Deviation at which a transfer is forced
    pub const CRITICAL_DRIFT_THRESHOLD: Decimal = dec!(0.35);

    /// Estimated loss rate of a triangular conversion
    pub const CONVERSION_LOSS_RATE: Decimal = dec!(0.002);

    /// Stable reserves below this flip the capital mode
    pub const BOTTLENECK_FLOOR: Decimal = dec!(1500);

    /// Default order timeout in milliseconds
    pub const ORDER_TIMEOUT_MS: u64 = 5000;

    /// Default book fetch timeout in milliseconds
    pub const BOOK_FETCH_TIMEOUT_MS: u64 = 2000;

    /// Default scan cycle interval in milliseconds
    pub const CYCLE_INTERVAL_MS: u64 = 1000;

    /// Default per-cycle scan time budget in milliseconds
    pub const SCAN_BUDGET_MS: u64 = 750;

    /// Default health check interval in seconds
    pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
}
