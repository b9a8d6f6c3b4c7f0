//! Drift resolution: free intra-exchange conversion vs. paid transfer.
//!
//! Keeping allocation drift small is what keeps the arbitrage loop running
//! smoothly; conversions are preferred because a triangular route inside
//! one exchange eliminates transfer fees entirely. Past the critical
//! threshold, urgency overrides cost-optimality and a transfer is forced.

use crate::{
    capital::{CapitalAllocator, CapitalSource, DriftRecord},
    connectors::{Exchange, FeeProvider, TransferCollaborator},
    data::{Asset, MarketView, Money},
    strategy::{Opportunity, TriangularScanner},
    EngineError, Result,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Outcome of one asset's drift correction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftOutcome {
    /// Corrected by an intra-exchange triangular conversion
    Converted,
    /// Corrected by a cross-exchange transfer
    TransferredExternally,
    /// Below threshold, or both correction paths failed (retried next cycle)
    NoActionTaken,
}

/// Executes a conversion route chosen by the drift controller.
///
/// Implemented by the trading executor; the controller itself never places
/// orders.
#[async_trait]
pub trait ConversionExecutor: Send + Sync {
    /// Run the triangular route to completion
    async fn execute_conversion(&self, opportunity: &Opportunity) -> Result<()>;
}

/// Tunables for drift resolution
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftPolicy {
    /// Deviation that triggers a correction
    pub drift_threshold: Decimal,
    /// Deviation at which a transfer is forced regardless of cost
    pub critical_threshold: Decimal,
    /// Estimated loss rate of a triangular conversion
    pub conversion_loss_rate: Decimal,
    /// Minimum net rate a conversion route must clear to be used
    pub min_conversion_profit_pct: Decimal,
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            drift_threshold: dec!(0.15),
            critical_threshold: dec!(0.35),
            conversion_loss_rate: dec!(0.002),
            min_conversion_profit_pct: dec!(-0.002),
        }
    }
}

/// Searches constrained triangular routes that touch a drifted asset
#[derive(Debug, Clone)]
pub struct ConversionManager {
    scanner: TriangularScanner,
    min_conversion_profit_pct: Decimal,
}

impl ConversionManager {
    /// Create a manager around a bounded triangular scanner
    pub fn new(scanner: TriangularScanner, min_conversion_profit_pct: Decimal) -> Self {
        Self {
            scanner,
            min_conversion_profit_pct,
        }
    }

    /// Best conversion route touching `asset`, across all exchanges in the
    /// view, or None when nothing clears the minimum rate.
    pub fn find_route(
        &self,
        asset: Asset,
        view: &MarketView,
        capital: &dyn CapitalSource,
        fees: &dyn FeeProvider,
    ) -> Option<Opportunity> {
        let mut best: Option<Opportunity> = None;
        for exchange in [
            Exchange::Binance,
            Exchange::Bybit,
            Exchange::Kraken,
            Exchange::Coinbase,
        ] {
            let paths: Vec<_> = self
                .scanner
                .derive_paths(view, exchange)
                .into_iter()
                .filter(|path| path.contains(&asset))
                .collect();
            if paths.is_empty() {
                continue;
            }
            let routes = self.scanner.scan(
                exchange,
                &paths,
                view,
                capital,
                fees,
                self.min_conversion_profit_pct,
            );
            for route in routes {
                let better = best
                    .as_ref()
                    .map(|b| route.net_profit_pct() > b.net_profit_pct())
                    .unwrap_or(true);
                if better {
                    best = Some(route);
                }
            }
        }
        best
    }
}

/// Decides and drives drift correction each allocation cycle
pub struct DriftController {
    policy: DriftPolicy,
    conversion: ConversionManager,
}

impl DriftController {
    /// Create a controller
    pub fn new(policy: DriftPolicy, conversion: ConversionManager) -> Self {
        Self { policy, conversion }
    }

    /// The active policy
    pub fn policy(&self) -> &DriftPolicy {
        &self.policy
    }

    /// Resolve every drifted record. Returns one outcome per record; a
    /// failed correction logs and reports `NoActionTaken` so the next cycle
    /// retries — drift is never silently marked resolved.
    #[allow(clippy::too_many_arguments)]
    pub async fn resolve(
        &self,
        drifts: &[DriftRecord],
        view: &MarketView,
        allocator: &CapitalAllocator,
        fees: &dyn FeeProvider,
        transfer: &dyn TransferCollaborator,
        executor: &dyn ConversionExecutor,
    ) -> Vec<(Asset, DriftOutcome)> {
        let total_value = allocator.total_value_usd(view);
        let mut outcomes = Vec::new();

        for record in drifts {
            let outcome = if record.magnitude() < self.policy.drift_threshold {
                DriftOutcome::NoActionTaken
            } else {
                self.resolve_one(record, total_value, view, allocator, fees, transfer, executor)
                    .await
            };
            outcomes.push((record.asset, outcome));
        }

        outcomes
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_one(
        &self,
        record: &DriftRecord,
        total_value: Decimal,
        view: &MarketView,
        allocator: &CapitalAllocator,
        fees: &dyn FeeProvider,
        transfer: &dyn TransferCollaborator,
        executor: &dyn ConversionExecutor,
    ) -> DriftOutcome {
        let deviation_value = record.magnitude() * total_value;
        let conversion_cost = deviation_value * self.policy.conversion_loss_rate;

        let route = self.plan_transfer(record, deviation_value, allocator);
        let transfer_cost = route
            .as_ref()
            .and_then(|(from, to, amount)| transfer.get_transfer_fee(*from, *to, *amount))
            .map(|quote| quote.fee.amount);

        if record.magnitude() >= self.policy.critical_threshold {
            // Urgency overrides cost-optimality.
            info!(
                asset = %record.asset,
                deviation = %record.deviation,
                "critical drift: forcing transfer"
            );
            if self
                .try_transfer(record.asset, route.as_ref(), transfer)
                .await
            {
                return DriftOutcome::TransferredExternally;
            }
            warn!(asset = %record.asset, "forced transfer failed, trying conversion");
            if self
                .try_conversion(record.asset, view, allocator, fees, executor)
                .await
            {
                return DriftOutcome::Converted;
            }
            self.report_failure(record.asset, "transfer and conversion both failed");
            return DriftOutcome::NoActionTaken;
        }

        let prefer_conversion = match transfer_cost {
            Some(cost) => conversion_cost <= cost,
            // No viable transfer route: conversion is the only option.
            None => true,
        };

        if prefer_conversion {
            if self
                .try_conversion(record.asset, view, allocator, fees, executor)
                .await
            {
                return DriftOutcome::Converted;
            }
            // No route above the minimum rate: fall back to transfer.
            if self
                .try_transfer(record.asset, route.as_ref(), transfer)
                .await
            {
                return DriftOutcome::TransferredExternally;
            }
        } else {
            if self
                .try_transfer(record.asset, route.as_ref(), transfer)
                .await
            {
                return DriftOutcome::TransferredExternally;
            }
            warn!(asset = %record.asset, "transfer failed, falling back to conversion");
            if self
                .try_conversion(record.asset, view, allocator, fees, executor)
                .await
            {
                return DriftOutcome::Converted;
            }
        }

        self.report_failure(record.asset, "no correction path succeeded");
        DriftOutcome::NoActionTaken
    }

    /// Plan the transfer direction off the deviation sign: an excess moves
    /// the asset from its richest venue toward its poorest, a deficit pulls
    /// the other way round.
    fn plan_transfer(
        &self,
        record: &DriftRecord,
        deviation_value: Decimal,
        allocator: &CapitalAllocator,
    ) -> Option<(Exchange, Exchange, Money)> {
        let exchanges = [
            Exchange::Binance,
            Exchange::Bybit,
            Exchange::Kraken,
            Exchange::Coinbase,
        ];
        let richest = exchanges
            .iter()
            .max_by_key(|ex| allocator.balance(**ex, record.asset).free)?;
        let poorest = exchanges
            .iter()
            .min_by_key(|ex| allocator.balance(**ex, record.asset).free)?;
        if richest == poorest {
            return None;
        }
        // Move half the deviation, like the original equalizer, so one
        // correction never overshoots the target from the other side.
        let amount = Money::new(deviation_value / dec!(2), record.asset);
        if !amount.is_positive() {
            return None;
        }
        if record.deviation > Decimal::ZERO {
            Some((*richest, *poorest, amount))
        } else {
            Some((*poorest, *richest, amount))
        }
    }

    async fn try_transfer(
        &self,
        asset: Asset,
        route: Option<&(Exchange, Exchange, Money)>,
        transfer: &dyn TransferCollaborator,
    ) -> bool {
        let Some((from, to, amount)) = route else {
            return false;
        };
        let Some(quote) = transfer.get_transfer_fee(*from, *to, *amount) else {
            return false;
        };
        match transfer
            .execute_transfer(asset, *from, *to, *amount, &quote.network)
            .await
        {
            Ok(()) => {
                info!(
                    asset = %asset,
                    from = %from,
                    to = %to,
                    network = %quote.network,
                    fee = %quote.fee,
                    "drift transfer executed"
                );
                true
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "drift transfer failed");
                false
            }
        }
    }

    async fn try_conversion(
        &self,
        asset: Asset,
        view: &MarketView,
        allocator: &CapitalAllocator,
        fees: &dyn FeeProvider,
        executor: &dyn ConversionExecutor,
    ) -> bool {
        let Some(route) = self.conversion.find_route(asset, view, allocator, fees) else {
            return false;
        };
        match executor.execute_conversion(&route).await {
            Ok(()) => {
                info!(asset = %asset, route = %route.describe(), "drift conversion executed");
                true
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "drift conversion failed");
                false
            }
        }
    }

    fn report_failure(&self, asset: Asset, reason: &str) {
        let err = EngineError::DriftResolution {
            asset,
            reason: reason.to_string(),
        };
        warn!(error = %err, "drift unresolved, retrying next cycle");
    }
}
