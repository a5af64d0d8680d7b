use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::order::Order;
use super::trade::Trade;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matches {
    #[serde(default)]
    pub taker_order: Option<Order>,
    #[serde(default)]
    pub maker_orders: Vec<Order>,
    #[serde(default)]
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    pub nonce: i64,
    pub status: EventStatus,
    #[serde(default)]
    pub matches: Matches,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledBatch {
    pub nonce: i64,
    #[serde(default)]
    pub query: Value,
    #[serde(default)]
    pub data: Vec<Order>,
}

/// Tagged union of the two event shapes the engine emits on the bus.
#[derive(Debug, Clone)]
pub enum Event {
    Engine(EngineResponse),
    Cancelled(CancelledBatch),
}

impl Event {
    pub fn nonce(&self) -> i64 {
        match self {
            Event::Engine(e) => e.nonce,
            Event::Cancelled(c) => c.nonce,
        }
    }
}
