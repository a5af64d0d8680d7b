use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audit record of one successful pickup. Created once per processed event
/// and never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "_id")]
    pub id: String,
    pub nonce: i64,
    pub bus_offset: i64,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}
