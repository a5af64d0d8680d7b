//! Event Decoder (component B)

use thiserror::Error;

use crate::models::{CancelledBatch, EngineResponse, Event, EventStatus};

pub const TOPIC_ENGINE: &str = "ENGINE";
pub const TOPIC_CANCELLED_ORDER: &str = "CANCELLED_ORDER";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload on topic {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid nonce {nonce} on topic {topic}")]
    InvalidNonce { topic: String, nonce: i64 },
    #[error("engine rejected the event (nonce {nonce})")]
    Rejected { nonce: i64 },
}

/// Parses a raw bus payload into a typed [`Event`].
///
/// Returns `Ok(None)` for topics this pipeline does not subscribe to —
/// that is a no-op success, not an error.
pub fn decode(topic: &str, payload: &[u8]) -> Result<Option<Event>, DecodeError> {
    match topic {
        TOPIC_ENGINE => decode_engine(payload).map(Some),
        TOPIC_CANCELLED_ORDER => decode_cancelled(payload).map(Some),
        _ => Ok(None),
    }
}

fn decode_engine(payload: &[u8]) -> Result<Event, DecodeError> {
    let parsed: EngineResponse =
        serde_json::from_slice(payload).map_err(|source| DecodeError::Malformed {
            topic: TOPIC_ENGINE.to_string(),
            source,
        })?;

    if parsed.nonce <= 0 {
        return Err(DecodeError::InvalidNonce {
            topic: TOPIC_ENGINE.to_string(),
            nonce: parsed.nonce,
        });
    }

    if parsed.status == EventStatus::Rejected {
        return Err(DecodeError::Rejected {
            nonce: parsed.nonce,
        });
    }

    Ok(Event::Engine(parsed))
}

fn decode_cancelled(payload: &[u8]) -> Result<Event, DecodeError> {
    let parsed: CancelledBatch =
        serde_json::from_slice(payload).map_err(|source| DecodeError::Malformed {
            topic: TOPIC_CANCELLED_ORDER.to_string(),
            source,
        })?;

    if parsed.nonce <= 0 {
        return Err(DecodeError::InvalidNonce {
            topic: TOPIC_CANCELLED_ORDER.to_string(),
            nonce: parsed.nonce,
        });
    }

    Ok(Event::Cancelled(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_topic_is_noop_success() {
        let result = decode("SOME_OTHER_TOPIC", b"not even json");
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn malformed_engine_payload_is_rejected() {
        let result = decode(TOPIC_ENGINE, b"not json");
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn zero_nonce_is_invalid() {
        let payload = serde_json::json!({
            "nonce": 0,
            "status": "accepted",
            "matches": {},
            "createdAt": "2026-01-01T00:00:00Z",
        });
        let result = decode(TOPIC_ENGINE, payload.to_string().as_bytes());
        assert!(matches!(result, Err(DecodeError::InvalidNonce { nonce: 0, .. })));
    }

    #[test]
    fn rejected_status_is_reported() {
        let payload = serde_json::json!({
            "nonce": 6,
            "status": "rejected",
            "matches": {},
            "createdAt": "2026-01-01T00:00:00Z",
        });
        let result = decode(TOPIC_ENGINE, payload.to_string().as_bytes());
        assert!(matches!(result, Err(DecodeError::Rejected { nonce: 6 })));
    }

    #[test]
    fn accepted_engine_event_decodes() {
        let payload = serde_json::json!({
            "nonce": 6,
            "status": "accepted",
            "matches": {"makerOrders": [], "trades": []},
            "createdAt": "2026-01-01T00:00:00Z",
        });
        let result = decode(TOPIC_ENGINE, payload.to_string().as_bytes()).unwrap();
        assert!(matches!(result, Some(Event::Engine(_))));
    }

    #[test]
    fn cancelled_batch_decodes() {
        let payload = serde_json::json!({
            "nonce": 6,
            "query": {"symbol": "BTC-PERP"},
            "data": [],
        });
        let result = decode(TOPIC_CANCELLED_ORDER, payload.to_string().as_bytes()).unwrap();
        assert!(matches!(result, Some(Event::Cancelled(_))));
    }
}
