use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    On,
    Off,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::On => write!(f, "ON"),
            EngineState::Off => write!(f, "OFF"),
        }
    }
}

/// Singleton document reflecting whether the matching engine looks reachable
/// and in sync. Created lazily by the nonce monitor, never by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub engine: EngineState,
    pub gateway: EngineState,
    pub updated_at: DateTime<Utc>,
}

impl SystemStatus {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            engine: EngineState::On,
            gateway: EngineState::On,
            updated_at: now,
        }
    }
}
