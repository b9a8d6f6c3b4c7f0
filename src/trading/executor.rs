//! Opportunity execution with reservation-first semantics.
//!
//! Every execution holds reservations for its full trade value on both legs
//! before any external order goes out; that is what makes "two opportunities
//! in the same cycle both spending the same balance" impossible. Triangular
//! cycles run their legs strictly in order, each leg sized from the
//! previous leg's actual fill.

use crate::{
    capital::{CapitalAllocator, ConversionExecutor, ReservationHandle},
    connectors::{
        Exchange, ExchangeAdapter, OrderResult, OrderSide, PersistenceCollaborator, TradeRecord,
    },
    data::{Money, Pair},
    strategy::Opportunity,
    EngineError, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Places orders for detected opportunities against adapter instances
pub struct OpportunityExecutor {
    allocator: Arc<CapitalAllocator>,
    adapters: IndexMap<Exchange, Arc<dyn ExchangeAdapter>>,
    persistence: Arc<dyn PersistenceCollaborator>,
    order_timeout: Duration,
}

impl OpportunityExecutor {
    /// Create an executor
    pub fn new(
        allocator: Arc<CapitalAllocator>,
        adapters: IndexMap<Exchange, Arc<dyn ExchangeAdapter>>,
        persistence: Arc<dyn PersistenceCollaborator>,
        order_timeout: Duration,
    ) -> Self {
        Self {
            allocator,
            adapters,
            persistence,
            order_timeout,
        }
    }

    /// Execute one opportunity to completion
    pub async fn execute(&self, opportunity: &Opportunity) -> Result<()> {
        match opportunity {
            Opportunity::CrossExchange { .. } => self.execute_cross(opportunity).await,
            Opportunity::Triangular { .. } => self.execute_triangular(opportunity).await,
        }
    }

    fn adapter(&self, exchange: Exchange) -> Result<&Arc<dyn ExchangeAdapter>> {
        self.adapters
            .get(&exchange)
            .ok_or_else(|| {
                EngineError::DataUnavailable {
                    exchange,
                    reason: "no adapter registered".to_string(),
                }
                .into()
            })
    }

    async fn place_with_timeout(
        &self,
        exchange: Exchange,
        pair: Pair,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> Result<OrderResult> {
        let adapter = self.adapter(exchange)?;
        match tokio::time::timeout(
            self.order_timeout,
            adapter.place_order(pair, side, amount, price),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                exchange,
                operation: format!("place_order {} {} {}", pair, side, amount),
            }
            .into()),
        }
    }

    async fn record_trade(&self, opportunity: &Opportunity, success: bool, profit: Option<Money>) {
        let record = TradeRecord {
            opportunity: opportunity.clone(),
            success,
            realized_profit: profit,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.persistence.save_trade(record).await {
            warn!(error = %e, "failed to persist trade record");
        }
    }

    /// Both legs of a cross-exchange opportunity are reserved up front and
    /// submitted together; a failure on either side releases every hold.
    async fn execute_cross(&self, opportunity: &Opportunity) -> Result<()> {
        let Opportunity::CrossExchange {
            pair,
            buy_exchange,
            sell_exchange,
            buy_price,
            sell_price,
            trade_value,
            ..
        } = opportunity
        else {
            return Err(
                EngineError::Validation("expected cross-exchange opportunity".to_string()).into(),
            );
        };

        let amount = trade_value.amount / *buy_price;

        // Quote on the buy venue, base on the sell venue, acquired in fixed
        // global key order by the allocator.
        let (buy_hold, sell_hold) = self.allocator.reserve_pair(
            (*buy_exchange, pair.quote, trade_value.amount),
            (*sell_exchange, pair.base, amount),
        )?;

        info!(opportunity = %opportunity.describe(), "executing cross-exchange");

        let (buy_result, sell_result) = tokio::join!(
            self.place_with_timeout(*buy_exchange, *pair, OrderSide::Buy, amount, *buy_price),
            self.place_with_timeout(*sell_exchange, *pair, OrderSide::Sell, amount, *sell_price),
        );

        match (buy_result, sell_result) {
            (Ok(buy), Ok(sell)) => {
                self.settle_leg(&buy_hold, &buy)?;
                self.settle_leg(&sell_hold, &sell)?;
                self.allocator.commit(buy_hold)?;
                self.allocator.commit(sell_hold)?;

                let realized = (sell.filled_quantity * sell.average_price.unwrap_or(*sell_price))
                    - (buy.filled_quantity * buy.average_price.unwrap_or(*buy_price));
                self.record_trade(
                    opportunity,
                    true,
                    Some(Money::new(realized, pair.quote)),
                )
                .await;
                info!(
                    buy_order = %buy.order_id,
                    sell_order = %sell.order_id,
                    realized = %realized,
                    "cross-exchange executed"
                );
                Ok(())
            }
            (buy_result, sell_result) => {
                // One or both legs failed: free every hold and surface the
                // first error. A single filled leg leaves a position the
                // next allocation cycle will see through balance sync.
                if let Ok(buy) = &buy_result {
                    self.settle_leg(&buy_hold, buy)?;
                    self.allocator.commit(buy_hold)?;
                } else {
                    self.allocator.release(buy_hold);
                }
                if let Ok(sell) = &sell_result {
                    self.settle_leg(&sell_hold, sell)?;
                    self.allocator.commit(sell_hold)?;
                } else {
                    self.allocator.release(sell_hold);
                }

                let cause = buy_result
                    .err()
                    .or(sell_result.err())
                    .expect("at least one leg failed");
                error!(error = %cause, "cross-exchange execution failed");
                self.record_trade(opportunity, false, None).await;
                Err(cause)
            }
        }
    }

    /// Book the side effects of one filled leg: unspent reserve returns to
    /// the free pool, acquired assets are credited.
    fn settle_leg(&self, hold: &ReservationHandle, result: &OrderResult) -> Result<()> {
        let price = result.average_price.unwrap_or(result.price);
        match result.side {
            OrderSide::Buy => {
                let spent = result.filled_quantity * price;
                let unspent = hold.amount - spent;
                if unspent > Decimal::ZERO {
                    self.allocator.deposit(hold.exchange, hold.asset, unspent);
                }
                self.allocator
                    .deposit(hold.exchange, result.pair.base, result.filled_quantity);
            }
            OrderSide::Sell => {
                let unsold = hold.amount - result.filled_quantity;
                if unsold > Decimal::ZERO {
                    self.allocator.deposit(hold.exchange, hold.asset, unsold);
                }
                self.allocator.deposit(
                    hold.exchange,
                    result.pair.quote,
                    result.filled_quantity * price,
                );
            }
        }
        Ok(())
    }

    /// Legs are placed and confirmed strictly in path order; leg N+1's
    /// amount derives from leg N's actual fill, never from the original
    /// capital figure. A failure mid-cycle releases the remaining hold and
    /// surfaces the partial fills for reconciliation.
    async fn execute_triangular(&self, opportunity: &Opportunity) -> Result<()> {
        let Opportunity::Triangular {
            exchange,
            leg_pairs,
            trade_value,
            ..
        } = opportunity
        else {
            return Err(
                EngineError::Validation("expected triangular opportunity".to_string()).into(),
            );
        };
        let exchange = *exchange;

        let hold = self
            .allocator
            .reserve(exchange, trade_value.asset, trade_value.amount)?;

        info!(opportunity = %opportunity.describe(), "executing triangular cycle");

        let adapter = match self.adapter(exchange) {
            Ok(a) => Arc::clone(a),
            Err(e) => {
                self.allocator.release(hold);
                return Err(e);
            }
        };

        // Leg 1: spend the start asset for the intermediate.
        let leg1 = leg_pairs[0];
        let ask1 = match self.leg_reference_price(&adapter, leg1, OrderSide::Buy).await {
            Ok(p) => p,
            Err(e) => {
                self.allocator.release(hold);
                return Err(e);
            }
        };
        let leg1_amount = trade_value.amount / ask1;
        let leg1_result = match self
            .place_with_timeout(exchange, leg1, OrderSide::Buy, leg1_amount, ask1)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // Nothing filled: the full hold returns to the pool.
                self.allocator.release(hold);
                self.record_trade(opportunity, false, None).await;
                return Err(e);
            }
        };

        // Leg 2: sized from leg 1's confirmed fill.
        let leg2 = leg_pairs[1];
        let leg2_input = leg1_result.filled_quantity;
        let leg2_result = match self.leg_reference_price(&adapter, leg2, OrderSide::Buy).await {
            Ok(ask2) => {
                let leg2_amount = leg2_input / ask2;
                self.place_with_timeout(exchange, leg2, OrderSide::Buy, leg2_amount, ask2)
                    .await
            }
            Err(e) => Err(e),
        };
        let leg2_result = match leg2_result {
            Ok(r) => r,
            Err(e) => {
                return self
                    .abort_triangular(opportunity, exchange, hold, &[leg1_result], e)
                    .await;
            }
        };

        // Leg 3: sell the final asset back into the start asset.
        let leg3 = leg_pairs[2];
        let leg3_result = match self.leg_reference_price(&adapter, leg3, OrderSide::Sell).await {
            Ok(bid3) => {
                self.place_with_timeout(
                    exchange,
                    leg3,
                    OrderSide::Sell,
                    leg2_result.filled_quantity,
                    bid3,
                )
                .await
            }
            Err(e) => Err(e),
        };
        let leg3_result = match leg3_result {
            Ok(r) => r,
            Err(e) => {
                return self
                    .abort_triangular(opportunity, exchange, hold, &[leg1_result, leg2_result], e)
                    .await;
            }
        };

        // All legs confirmed: settle the cycle's accounting.
        let spent = leg1_result.filled_quantity
            * leg1_result.average_price.unwrap_or(leg1_result.price);
        let proceeds = leg3_result.filled_quantity
            * leg3_result.average_price.unwrap_or(leg3_result.price);
        self.allocator.commit(hold)?;
        let unspent = trade_value.amount - spent;
        if unspent > Decimal::ZERO {
            self.allocator.deposit(exchange, trade_value.asset, unspent);
        }
        self.allocator.deposit(exchange, trade_value.asset, proceeds);

        let realized = proceeds - spent;
        self.record_trade(
            opportunity,
            true,
            Some(Money::new(realized, trade_value.asset)),
        )
        .await;
        info!(realized = %realized, "triangular cycle completed");
        Ok(())
    }

    async fn leg_reference_price(
        &self,
        adapter: &Arc<dyn ExchangeAdapter>,
        pair: Pair,
        side: OrderSide,
    ) -> Result<Decimal> {
        let book = tokio::time::timeout(self.order_timeout, adapter.get_order_book(pair, 5))
            .await
            .map_err(|_| EngineError::Timeout {
                exchange: adapter.exchange(),
                operation: format!("get_order_book {}", pair),
            })??;
        book.validate()?;
        let price = match side {
            OrderSide::Buy => book.best_ask(),
            OrderSide::Sell => book.best_bid(),
        };
        price
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| {
                EngineError::DataUnavailable {
                    exchange: adapter.exchange(),
                    reason: format!("no usable {} price for {}", side, pair),
                }
                .into()
            })
    }

    /// A leg failed after earlier legs filled. The start-asset hold minus
    /// what leg 1 actually spent returns to the pool, and the asset mix the
    /// filled legs left behind is credited so balances stay truthful. The
    /// exposure is NOT unwound here; it is recorded and surfaced for
    /// reconciliation.
    async fn abort_triangular(
        &self,
        opportunity: &Opportunity,
        exchange: Exchange,
        hold: ReservationHandle,
        completed: &[OrderResult],
        cause: anyhow::Error,
    ) -> Result<()> {
        let leg1 = &completed[0];
        let spent = leg1.filled_quantity * leg1.average_price.unwrap_or(leg1.price);
        let start_asset = hold.asset;
        let unspent = hold.amount - spent;
        self.allocator.commit(hold)?;
        if unspent > Decimal::ZERO {
            self.allocator.deposit(exchange, start_asset, unspent);
        }

        // Each filled leg acquired its pair's base and the next leg spent
        // part of it; the residues are what remains stranded.
        for (i, leg) in completed.iter().enumerate() {
            let acquired = leg.filled_quantity;
            let spent_by_next = completed
                .get(i + 1)
                .map(|next| {
                    next.filled_quantity * next.average_price.unwrap_or(next.price)
                })
                .unwrap_or(Decimal::ZERO);
            let residue = acquired - spent_by_next;
            if residue > Decimal::ZERO {
                self.allocator.deposit(exchange, leg.pair.base, residue);
            }
        }

        let fills: Vec<Decimal> = completed.iter().map(|l| l.filled_quantity).collect();
        let partial = EngineError::TriangularPartial {
            exchange,
            filled_legs: fills.iter().filter(|f| **f > Decimal::ZERO).count(),
            fills,
        };
        error!(error = %partial, cause = %cause, "triangular cycle aborted mid-path");
        self.record_trade(opportunity, false, None).await;
        Err(partial.into())
    }
}

#[async_trait]
impl ConversionExecutor for OpportunityExecutor {
    async fn execute_conversion(&self, opportunity: &Opportunity) -> Result<()> {
        match opportunity {
            Opportunity::Triangular { .. } => self.execute_triangular(opportunity).await,
            Opportunity::CrossExchange { .. } => Err(EngineError::Validation(
                "conversions are intra-exchange triangular routes".to_string(),
            )
            .into()),
        }
    }
}
