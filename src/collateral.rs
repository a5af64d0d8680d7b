//! Collateral Adjuster (component D)
//!
//! Pure computation over an in-memory [`UserAccount`]; the pipeline (4.E)
//! owns fetching the account from the repository and upserting the result.

use rust_decimal::Decimal;

use crate::models::{Balance, Contract, Leg, Side, Trade, UserAccount};

/// Applies one leg (taker or maker) of a non-failed trade to `account`,
/// mutating its USD balance and its position in `trade.instrument`.
pub fn apply_leg(account: &mut UserAccount, trade: &Trade, leg: &Leg) {
    let notional = trade.amount * trade.price;

    let balance_delta = match leg.side {
        Side::Buy => -(notional + leg.fee),
        Side::Sell => notional - leg.fee,
    };

    let contract_delta = match leg.side {
        Side::Buy => trade.amount,
        Side::Sell => -trade.amount,
    };

    apply_usd_delta(account, balance_delta);
    apply_contract_delta(account, &trade.instrument, contract_delta);
}

fn apply_usd_delta(account: &mut UserAccount, delta: Decimal) {
    match account.usd_balance_index() {
        Some(idx) => account.collaterals.balances[idx].amount += delta,
        None => {
            tracing::warn!(user_id = %account.id, "no USD balance row found, creating one");
            account.collaterals.balances.push(Balance {
                currency: "USD".to_string(),
                amount: delta,
            });
        }
    }
}

fn apply_contract_delta(account: &mut UserAccount, instrument_name: &str, delta: Decimal) {
    match account.contract_index(instrument_name) {
        Some(idx) => account.collaterals.contracts[idx].amount += delta,
        None => account.collaterals.contracts.push(Contract {
            instrument_name: instrument_name.to_string(),
            amount: delta,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collaterals;
    use rust_decimal_macros::dec;

    fn account(usd: Decimal) -> UserAccount {
        UserAccount {
            id: "user-1".into(),
            collaterals: Collaterals {
                balances: vec![Balance {
                    currency: "USD".into(),
                    amount: usd,
                }],
                contracts: vec![],
            },
        }
    }

    fn trade(amount: Decimal, price: Decimal) -> Trade {
        Trade {
            id: "trade-1".into(),
            price,
            amount,
            status: "ok".into(),
            taker: Leg {
                user_id: "taker".into(),
                side: Side::Buy,
                fee: dec!(1),
            },
            maker: Leg {
                user_id: "maker".into(),
                side: Side::Sell,
                fee: dec!(0.5),
            },
            instrument: "BTC-PERP".into(),
        }
    }

    #[test]
    fn s1_buy_taker_debits_notional_plus_fee() {
        let t = trade(dec!(2), dec!(100));
        let mut taker_account = account(dec!(1000));
        apply_leg(&mut taker_account, &t, &t.taker);

        assert_eq!(taker_account.collaterals.balances[0].amount, dec!(799));
        assert_eq!(taker_account.collaterals.contracts[0].amount, dec!(2));
    }

    #[test]
    fn s1_sell_maker_credits_notional_minus_fee() {
        let t = trade(dec!(2), dec!(100));
        let mut maker_account = account(dec!(1000));
        apply_leg(&mut maker_account, &t, &t.maker);

        assert_eq!(maker_account.collaterals.balances[0].amount, dec!(1199.5));
        assert_eq!(maker_account.collaterals.contracts[0].amount, dec!(-2));
    }

    #[test]
    fn fee_inclusive_deltas_sum_to_negative_total_fees() {
        let t = trade(dec!(2), dec!(100));
        let taker_delta = -(t.amount * t.price + t.taker.fee);
        let maker_delta = t.amount * t.price - t.maker.fee;
        assert_eq!(taker_delta + maker_delta, -(t.taker.fee + t.maker.fee));
    }

    #[test]
    fn missing_usd_balance_is_created() {
        let t = trade(dec!(1), dec!(50));
        let mut acc = UserAccount {
            id: "user-2".into(),
            collaterals: Collaterals::default(),
        };
        apply_leg(&mut acc, &t, &t.taker);
        assert_eq!(acc.collaterals.balances.len(), 1);
        assert_eq!(acc.collaterals.balances[0].currency, "USD");
    }

    #[test]
    fn missing_contract_is_appended_with_signed_amount() {
        let t = trade(dec!(3), dec!(10));
        let mut acc = account(dec!(0));
        apply_leg(&mut acc, &t, &t.maker);
        assert_eq!(acc.collaterals.contracts[0].instrument_name, "BTC-PERP");
        assert_eq!(acc.collaterals.contracts[0].amount, dec!(-3));
    }
}
