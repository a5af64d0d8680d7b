use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An order as produced by the matching engine.
///
/// The pipeline never interprets order fields beyond `id`: it upserts the
/// whole document verbatim. `fields` carries whatever the engine sent
/// (status, amounts, price, …) so a round trip through this type is lossless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Order {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_opaque_fields() {
        let raw = serde_json::json!({
            "_id": "order-1",
            "status": "open",
            "amount": "2.5",
        });
        let order: Order = serde_json::from_value(raw).unwrap();
        assert_eq!(order.id, "order-1");
        assert_eq!(order.fields.get("status").unwrap(), "open");
    }
}
