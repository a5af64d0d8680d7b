use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The taker or maker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    pub user_id: String,
    pub side: Side,
    pub fee: Decimal,
}

/// A matched trade. `status` is an open string set ("ok", "failed", …) per
/// the upstream engine, so it is kept as a string rather than a closed enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    #[serde(rename = "_id")]
    pub id: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub status: String,
    pub taker: Leg,
    pub maker: Leg,
    pub instrument: String,
}

impl Trade {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_failed(&self) -> bool {
        self.status.eq_ignore_ascii_case("failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn is_failed_is_case_insensitive() {
        let leg = Leg {
            user_id: "u1".into(),
            side: Side::Buy,
            fee: dec!(0),
        };
        let trade = Trade {
            id: "t1".into(),
            price: dec!(100),
            amount: dec!(1),
            status: "Failed".into(),
            taker: leg.clone(),
            maker: leg,
            instrument: "BTC-PERP".into(),
        };
        assert!(trade.is_failed());
    }
}
