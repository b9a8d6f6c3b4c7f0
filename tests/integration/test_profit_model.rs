//! End-to-end profit arithmetic scenarios

use arb_engine::{
    data::Asset,
    strategy::{ProfitInputs, ProfitModel},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn scenario(buy: Decimal, sell: Decimal) -> ProfitInputs {
    ProfitInputs {
        buy_price: buy,
        sell_price: sell,
        amount: dec!(1),
        fee_buy: dec!(0.001),
        fee_sell: dec!(0.001),
        slippage_pct: dec!(0.001),
        transfer_cost: Decimal::ZERO,
    }
}

#[test]
fn scenario_a_profitable_trade_nets_exactly() {
    let model = ProfitModel::default();
    let net = model
        .net_profit(scenario(dec!(100), dec!(102)), Asset::USDT)
        .unwrap();
    // gross 2, fees 0.1 + 0.102, slippage on the remainder
    assert_eq!(net.amount, dec!(1.796202));
}

#[test]
fn scenario_b_marginal_trade_floors_to_zero() {
    let model = ProfitModel::default();
    let net = model
        .net_profit(scenario(dec!(100), dec!(100.3)), Asset::USDT)
        .unwrap();
    assert_eq!(net.amount, Decimal::ZERO);
}

#[test]
fn floor_never_emits_small_positive_values() {
    let model = ProfitModel::default();
    // Sweep sell prices through the floor boundary; every result is
    // either zero or a margin of at least 0.5%.
    let mut sell = dec!(100.1);
    while sell < dec!(101.5) {
        let net = model
            .net_profit(scenario(dec!(100), sell), Asset::USDT)
            .unwrap();
        if !net.is_zero() {
            let margin = net.amount / dec!(100);
            assert!(margin >= dec!(0.005), "margin {} at sell {}", margin, sell);
        }
        sell += dec!(0.05);
    }
}

#[test]
fn profit_is_monotone_in_each_argument() {
    let model = ProfitModel::new(Decimal::ZERO);
    let base = model
        .net_profit(scenario(dec!(100), dec!(105)), Asset::USDT)
        .unwrap()
        .amount;

    // Higher sell price: non-decreasing.
    let higher_sell = model
        .net_profit(scenario(dec!(100), dec!(106)), Asset::USDT)
        .unwrap()
        .amount;
    assert!(higher_sell >= base);

    // Higher buy price, fees, slippage: non-increasing.
    let higher_buy = model
        .net_profit(scenario(dec!(100.5), dec!(105)), Asset::USDT)
        .unwrap()
        .amount;
    assert!(higher_buy <= base);

    let mut more_fees = scenario(dec!(100), dec!(105));
    more_fees.fee_sell = dec!(0.003);
    assert!(model.net_profit(more_fees, Asset::USDT).unwrap().amount <= base);

    let mut more_slip = scenario(dec!(100), dec!(105));
    more_slip.slippage_pct = dec!(0.02);
    assert!(model.net_profit(more_slip, Asset::USDT).unwrap().amount <= base);
}
