use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub instrument_name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Collaterals {
    pub balances: Vec<Balance>,
    pub contracts: Vec<Contract>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    #[serde(rename = "_id")]
    pub id: String,
    pub collaterals: Collaterals,
}

impl UserAccount {
    /// Index of the first USD balance row, if any.
    pub fn usd_balance_index(&self) -> Option<usize> {
        self.collaterals
            .balances
            .iter()
            .position(|b| b.currency == "USD")
    }

    pub fn contract_index(&self, instrument_name: &str) -> Option<usize> {
        self.collaterals
            .contracts
            .iter()
            .position(|c| c.instrument_name == instrument_name)
    }
}
