//! Cross-exchange spread scanner

use crate::{
    capital::CapitalSource,
    connectors::FeeProvider,
    data::{MarketView, Money, Pair},
    strategy::{Opportunity, ProfitInputs, ProfitModel},
};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

/// Scans every tradable pair across every ordered exchange pairing.
///
/// Both (A buys, B sells) and (B buys, A sells) orderings are evaluated
/// independently; their profitability differs. Results come back in
/// discovery order — the caller ranks by net profit and executes at most
/// one opportunity per scan cycle.
#[derive(Debug, Clone)]
pub struct CrossExchangeScanner {
    profit_model: ProfitModel,
    /// Hard cap on quote value committed to a single trade
    pub max_trade_usd: Decimal,
    /// Book levels summed for the depth check
    pub depth_levels: usize,
    /// Required depth as a multiple of trade value
    pub depth_multiplier: Decimal,
    /// Slippage allowance passed to the profit model
    pub slippage_pct: Decimal,
}

impl CrossExchangeScanner {
    /// Create a scanner
    pub fn new(
        profit_model: ProfitModel,
        max_trade_usd: Decimal,
        depth_multiplier: Decimal,
        slippage_pct: Decimal,
    ) -> Self {
        Self {
            profit_model,
            max_trade_usd,
            depth_levels: 5,
            depth_multiplier,
            slippage_pct,
        }
    }

    /// Scan the view for cross-exchange opportunities at or above `threshold`
    pub fn scan(
        &self,
        pairs: &[Pair],
        view: &MarketView,
        capital: &dyn CapitalSource,
        fees: &dyn FeeProvider,
        threshold: Decimal,
    ) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        for &pair in pairs {
            let exchanges = view.exchanges_with(pair);
            // A pair quoted on a single exchange has nothing to compare.
            if exchanges.len() < 2 {
                continue;
            }

            for &buy_ex in &exchanges {
                for &sell_ex in &exchanges {
                    if buy_ex == sell_ex {
                        continue;
                    }

                    let (buy_book, sell_book) =
                        match (view.book(buy_ex, pair), view.book(sell_ex, pair)) {
                            (Some(b), Some(s)) => (b, s),
                            _ => continue,
                        };
                    if buy_book.validate().is_err() || sell_book.validate().is_err() {
                        warn!(pair = %pair, "crossed book excluded from cross scan");
                        continue;
                    }

                    let (buy_price, sell_price) =
                        match (buy_book.best_ask(), sell_book.best_bid()) {
                            (Some(a), Some(b)) => (a, b),
                            _ => continue,
                        };

                    // Size against the shared pool: quote on the buy venue,
                    // base (valued at the sell bid) on the sell venue.
                    let buy_capital = capital.available(buy_ex, pair.quote).amount;
                    let sell_capital =
                        capital.available(sell_ex, pair.base).amount * sell_price;
                    let trade_value = buy_capital.min(sell_capital).min(self.max_trade_usd);
                    if trade_value <= Decimal::ZERO {
                        continue;
                    }
                    let trade_value = Money::new(trade_value, pair.quote);
                    let amount = trade_value.amount / buy_price;

                    let inputs = ProfitInputs {
                        buy_price,
                        sell_price,
                        amount,
                        fee_buy: fees.effective_fee(buy_ex, trade_value),
                        fee_sell: fees.effective_fee(sell_ex, trade_value),
                        slippage_pct: self.slippage_pct,
                        transfer_cost: Decimal::ZERO,
                    };
                    let net_pct = match self.profit_model.net_profit_pct(inputs, pair.quote) {
                        Ok(pct) => pct,
                        Err(e) => {
                            warn!(pair = %pair, error = %e, "profit input rejected");
                            continue;
                        }
                    };
                    if net_pct < threshold {
                        trace!(
                            pair = %pair,
                            net_pct = %net_pct,
                            "spread below threshold"
                        );
                        continue;
                    }

                    // Both sides must hold enough top-of-book volume to
                    // absorb the trade without phantom-liquidity fills.
                    let required = trade_value.mul_rate(self.depth_multiplier);
                    if buy_book.ask_volume(self.depth_levels).amount < required.amount
                        || sell_book.bid_volume(self.depth_levels).amount < required.amount
                    {
                        debug!(pair = %pair, "depth check failed");
                        continue;
                    }

                    opportunities.push(Opportunity::CrossExchange {
                        pair,
                        buy_exchange: buy_ex,
                        sell_exchange: sell_ex,
                        buy_price,
                        sell_price,
                        trade_value,
                        net_profit_pct: net_pct,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        opportunities
    }
}
