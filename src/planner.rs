//! Mutation Planner (component C)

use serde_json::Value;
use thiserror::Error;

use crate::models::{Event, Order, Trade};

pub const ENGINE_SAVED_TOPIC: &str = "ENGINE_SAVED";
pub const CANCELLED_ORDER_SAVED_TOPIC: &str = "CANCELLED_ORDER_SAVED";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to encode activity payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The set of mutations and bus side-effects a decoded event calls for.
#[derive(Debug, Clone)]
pub struct Plan {
    pub nonce: i64,
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
    pub activity_data: Value,
    pub saved_topic: &'static str,
}

pub fn plan(event: Event) -> Result<Plan, PlanError> {
    match event {
        Event::Engine(engine) => {
            let mut orders = engine.matches.maker_orders;
            if let Some(taker) = engine.matches.taker_order.clone() {
                orders.push(taker);
            }

            Ok(Plan {
                nonce: engine.nonce,
                activity_data: serde_json::to_value(&engine.matches)?,
                trades: engine.matches.trades,
                orders,
                saved_topic: ENGINE_SAVED_TOPIC,
            })
        }
        Event::Cancelled(cancelled) => Ok(Plan {
            nonce: cancelled.nonce,
            orders: cancelled.data,
            trades: Vec::new(),
            activity_data: serde_json::json!({ "query": cancelled.query }),
            saved_topic: CANCELLED_ORDER_SAVED_TOPIC,
        }),
    }
}
