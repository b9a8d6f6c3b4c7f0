//! Dynamic minimum-profit threshold derived from system health

use crate::connectors::{HealthReport, HealthStatus};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Policy constants for the dynamic threshold.
///
/// The clamp range is a tunable policy constant, not a derived value; it is
/// surfaced through configuration so operators can widen or tighten it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    /// Baseline minimum net profit rate
    pub baseline: Decimal,
    /// Added when health is degraded
    pub degraded_bump: Decimal,
    /// Added when health is critical
    pub critical_bump: Decimal,
    /// Added when cycle-time jitter exceeds `jitter_cutoff_secs`
    pub jitter_bump: Decimal,
    /// Jitter level (std dev of cycle durations, seconds) that triggers the bump
    pub jitter_cutoff_secs: f64,
    /// Lower clamp bound
    pub floor: Decimal,
    /// Upper clamp bound
    pub ceiling: Decimal,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            baseline: dec!(0.005),
            degraded_bump: dec!(0.002),
            critical_bump: dec!(0.005),
            jitter_bump: dec!(0.001),
            jitter_cutoff_secs: 0.5,
            floor: dec!(0.004),
            ceiling: dec!(0.010),
        }
    }
}

impl ThresholdPolicy {
    /// Minimum net profit rate required this cycle.
    ///
    /// Health and jitter signals are collaborator-provided; this function
    /// only combines and clamps them.
    pub fn get_threshold(&self, health: &HealthReport) -> Decimal {
        let mut threshold = self.baseline;

        match health.overall {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded => threshold += self.degraded_bump,
            HealthStatus::Critical => threshold += self.critical_bump,
        }

        if health.performance.std_cycle_time > self.jitter_cutoff_secs {
            threshold += self.jitter_bump;
        }

        threshold.clamp(self.floor, self.ceiling)
    }
}
