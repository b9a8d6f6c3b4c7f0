//! Static per-network transfer fee table

use crate::{
    connectors::{Exchange, TransferCollaborator, TransferQuote},
    data::{Asset, Money},
    EngineError, Result,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

/// One withdrawal network and its flat fee estimate
#[derive(Debug, Clone)]
struct NetworkFee {
    network: &'static str,
    fee_usd: Decimal,
    /// Relative settlement latency score; lower is faster
    latency_score: Decimal,
}

/// ERC20 is only worth its gas above this notional
const ERC20_MIN_NOTIONAL: Decimal = dec!(10000);

/// Transfer collaborator backed by a static network fee table.
///
/// Fees are rough per-chain estimates in the $0.10-$5 range. Network choice
/// scores fee plus a latency weight so a marginally cheaper but much slower
/// chain does not always win.
#[derive(Debug, Clone, Default)]
pub struct StaticTransferTable;

impl StaticTransferTable {
    fn networks() -> Vec<NetworkFee> {
        vec![
            NetworkFee {
                network: "TRX",
                fee_usd: dec!(1.00),
                latency_score: dec!(3),
            },
            NetworkFee {
                network: "SOL",
                fee_usd: dec!(0.10),
                latency_score: dec!(1),
            },
            NetworkFee {
                network: "BASE",
                fee_usd: dec!(0.15),
                latency_score: dec!(2),
            },
            NetworkFee {
                network: "BSC",
                fee_usd: dec!(0.30),
                latency_score: dec!(4),
            },
            NetworkFee {
                network: "MATIC",
                fee_usd: dec!(0.20),
                latency_score: dec!(3),
            },
            NetworkFee {
                network: "ERC20",
                fee_usd: dec!(5.00),
                latency_score: dec!(8),
            },
        ]
    }
}

#[async_trait]
impl TransferCollaborator for StaticTransferTable {
    fn get_transfer_fee(
        &self,
        from: Exchange,
        to: Exchange,
        amount: Money,
    ) -> Option<TransferQuote> {
        if from == to || !amount.is_positive() {
            return None;
        }
        let best = Self::networks()
            .into_iter()
            .filter(|n| n.network != "ERC20" || amount.amount >= ERC20_MIN_NOTIONAL)
            .min_by_key(|n| n.fee_usd + n.latency_score * dec!(0.1))?;
        Some(TransferQuote {
            fee: Money::new(best.fee_usd, Asset::USD),
            network: best.network.to_string(),
        })
    }

    async fn execute_transfer(
        &self,
        asset: Asset,
        from: Exchange,
        to: Exchange,
        amount: Money,
        network: &str,
    ) -> Result<()> {
        if from == to {
            return Err(EngineError::Validation(
                "transfer source and destination must differ".to_string(),
            )
            .into());
        }
        // The real withdrawal rails live behind the adapter layer; the
        // static table only records intent.
        info!(
            asset = %asset,
            from = %from,
            to = %to,
            amount = %amount,
            network = %network,
            "transfer requested"
        );
        Ok(())
    }
}
