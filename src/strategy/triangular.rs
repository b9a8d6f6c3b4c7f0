//! Triangular (three-leg cycle) scanner

use crate::{
    capital::CapitalSource,
    connectors::{Exchange, FeeProvider},
    data::{Asset, MarketView, Money, Pair},
    strategy::Opportunity,
};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Hard cap on distinct currencies fed to the permutation search.
///
/// The search is O(n^3); an unconstrained universe degrades to CPU
/// starvation under a large tradable-pair set, so the bound is enforced,
/// not advisory.
pub const MAX_CYCLE_CURRENCIES: usize = 15;

/// A candidate cycle A -> B -> C -> A over three currencies
pub type CyclePath = [Asset; 3];

/// Scans fixed and derived three-leg cycles on a single exchange.
///
/// For a path [A, B, C] the legs are: buy B with A (ask of B/A), buy C with
/// B (ask of C/B), sell C for A (bid of C/A). The compounded rate is
/// `(1/ask1) * (1/ask2) * bid3`; a path is profitable when the rate clears
/// one plus fees.
#[derive(Debug, Clone)]
pub struct TriangularScanner {
    /// Hard cap on quote value committed to the first leg
    pub max_trade_usd: Decimal,
    /// Book levels summed for the per-leg depth check
    pub depth_levels: usize,
    /// Required depth as a multiple of the leg's trade value
    pub depth_multiplier: Decimal,
}

impl TriangularScanner {
    /// Create a scanner
    pub fn new(max_trade_usd: Decimal, depth_multiplier: Decimal) -> Self {
        Self {
            max_trade_usd,
            depth_levels: 5,
            depth_multiplier,
        }
    }

    /// Derive candidate paths from the currencies tradable on `exchange`,
    /// truncating the universe to [`MAX_CYCLE_CURRENCIES`].
    pub fn derive_paths(&self, view: &MarketView, exchange: Exchange) -> Vec<CyclePath> {
        let pairs = view.pairs_on(exchange);
        let mut universe: Vec<Asset> = Vec::new();
        for pair in &pairs {
            for asset in [pair.base, pair.quote] {
                if !universe.contains(&asset) {
                    universe.push(asset);
                }
            }
        }
        universe.sort();
        if universe.len() > MAX_CYCLE_CURRENCIES {
            warn!(
                exchange = %exchange,
                currencies = universe.len(),
                cap = MAX_CYCLE_CURRENCIES,
                "currency universe truncated for permutation search"
            );
            universe.truncate(MAX_CYCLE_CURRENCIES);
        }

        let mut paths = Vec::new();
        for &a in &universe {
            for &b in &universe {
                if b == a {
                    continue;
                }
                for &c in &universe {
                    if c == a || c == b {
                        continue;
                    }
                    if Self::leg_pairs(&[a, b, c])
                        .iter()
                        .all(|p| view.book(exchange, *p).is_some())
                    {
                        paths.push([a, b, c]);
                    }
                }
            }
        }
        paths
    }

    /// The three leg pairs of a path, in execution order
    pub fn leg_pairs(path: &CyclePath) -> [Pair; 3] {
        let [a, b, c] = *path;
        [
            Pair { base: b, quote: a },
            Pair { base: c, quote: b },
            Pair { base: c, quote: a },
        ]
    }

    /// Scan candidate paths on one exchange for cycles netting at least
    /// `threshold` after per-leg fees
    pub fn scan(
        &self,
        exchange: Exchange,
        paths: &[CyclePath],
        view: &MarketView,
        capital: &dyn CapitalSource,
        fees: &dyn FeeProvider,
        threshold: Decimal,
    ) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        for path in paths {
            if path[0] == path[1] || path[1] == path[2] || path[0] == path[2] {
                continue;
            }
            let start_asset = path[0];
            let trade_value = capital
                .available(exchange, start_asset)
                .amount
                .min(self.max_trade_usd);
            if trade_value <= Decimal::ZERO {
                continue;
            }
            let trade_value = Money::new(trade_value, start_asset);

            if let Some(opp) =
                self.evaluate_path(exchange, path, view, trade_value, fees, threshold)
            {
                opportunities.push(opp);
            }
        }

        opportunities
    }

    fn evaluate_path(
        &self,
        exchange: Exchange,
        path: &CyclePath,
        view: &MarketView,
        trade_value: Money,
        fees: &dyn FeeProvider,
        threshold: Decimal,
    ) -> Option<Opportunity> {
        let legs = Self::leg_pairs(path);

        // Any missing leg book or non-positive reference price rejects the
        // whole path.
        let book1 = view.book(exchange, legs[0])?;
        let book2 = view.book(exchange, legs[1])?;
        let book3 = view.book(exchange, legs[2])?;
        for book in [book1, book2, book3] {
            if book.validate().is_err() {
                debug!(exchange = %exchange, pair = %book.pair, "invalid leg book");
                return None;
            }
        }

        let ask1 = book1.best_ask()?;
        let ask2 = book2.best_ask()?;
        let bid3 = book3.best_bid()?;
        if ask1 <= Decimal::ZERO || ask2 <= Decimal::ZERO || bid3 <= Decimal::ZERO {
            return None;
        }

        let rate = (Decimal::ONE / ask1) * (Decimal::ONE / ask2) * bid3;
        let gross = rate - Decimal::ONE;
        // Flat taker-fee approximation, one charge per leg.
        let fee_per_leg = fees.effective_fee(exchange, trade_value);
        let net = gross - fee_per_leg * Decimal::from(3);
        if net < threshold {
            return None;
        }

        // Per-leg depth: each leg's book must hold multiplier times the
        // value flowing through it, in that leg's own quote terms.
        let value_leg1 = trade_value.amount;
        let value_leg2 = trade_value.amount / ask1;
        let value_leg3 = trade_value.amount;
        let checks = [
            (book1.ask_volume(self.depth_levels).amount, value_leg1),
            (book2.ask_volume(self.depth_levels).amount, value_leg2),
            (book3.bid_volume(self.depth_levels).amount, value_leg3),
        ];
        for (available, leg_value) in checks {
            if available < leg_value * self.depth_multiplier {
                debug!(exchange = %exchange, "triangular depth check failed");
                return None;
            }
        }

        Some(Opportunity::Triangular {
            exchange,
            leg_pairs: legs,
            gross_profit_pct: gross,
            net_profit_pct: net,
            trade_value,
            timestamp: Utc::now(),
        })
    }
}
