//! Telemetry event and stream envelope types
//!
//! `TelemetryEvent` is what SDK batches carry; `BatchEnvelope` is the JSON
//! message written to the stream transport; `DeadLetterEnvelope` wraps an
//! envelope that permanently failed processing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::utils::tsid::Tsid;

use super::enums::EventType;

/// One event inside an ingest batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: Tsid,
    pub event_type: EventType,
    pub payload: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Event as carried inside a stream envelope (timestamp folded into the
/// envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeEvent {
    pub event_id: Tsid,
    pub event_type: EventType,
    pub payload: JsonValue,
}

impl From<&TelemetryEvent> for EnvelopeEvent {
    fn from(event: &TelemetryEvent) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            payload: event.payload.clone(),
        }
    }
}

/// Stream message for one accepted batch; only claimed events are included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub batch_id: Tsid,
    pub project_id: Tsid,
    pub events: Vec<EnvelopeEvent>,
    pub claimed_event_ids: Vec<Tsid>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Envelope written to the sibling dead-letter stream: the original message
/// plus failure context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    #[serde(flatten)]
    pub message: BatchEnvelope,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> BatchEnvelope {
        let event_id = Tsid::generate();
        BatchEnvelope {
            batch_id: Tsid::generate(),
            project_id: Tsid::generate(),
            events: vec![EnvelopeEvent {
                event_id,
                event_type: EventType::TraceCreate,
                payload: serde_json::json!({"name": "t"}),
            }],
            claimed_event_ids: vec![event_id],
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = sample_envelope();
        let json = serde_json::to_string(&envelope).unwrap();
        let back: BatchEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.batch_id, envelope.batch_id);
        assert_eq!(back.events.len(), 1);
        assert_eq!(back.events[0].event_type, EventType::TraceCreate);
        assert_eq!(back.claimed_event_ids, envelope.claimed_event_ids);
    }

    #[test]
    fn test_envelope_wire_fields() {
        let json = serde_json::to_value(sample_envelope()).unwrap();
        for field in [
            "batch_id",
            "project_id",
            "events",
            "claimed_event_ids",
            "metadata",
            "timestamp",
        ] {
            assert!(json.get(field).is_some(), "missing wire field {field}");
        }
        assert_eq!(json["events"][0]["event_type"], "trace.create");
    }

    #[test]
    fn test_dead_letter_flattens_original() {
        let dl = DeadLetterEnvelope {
            message: sample_envelope(),
            reason: "validation failed".to_string(),
            failed_at: Utc::now(),
            retry_count: 5,
        };
        let json = serde_json::to_value(&dl).unwrap();
        // Original fields flattened at top level alongside failure context
        assert!(json.get("batch_id").is_some());
        assert_eq!(json["reason"], "validation failed");
        assert_eq!(json["retry_count"], 5);
        let back: DeadLetterEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back.retry_count, 5);
    }
}
