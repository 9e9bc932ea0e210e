//! Trace entity and partial-update merging

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::utils::time::duration_ms;
use crate::utils::tsid::Tsid;

use super::enums::StatusCode;

/// A request-scoped root of the telemetry hierarchy.
///
/// `id` is the OTLP trace id (32 hex chars), kept opaque at the storage
/// boundary. `version` is bumped by the store layer on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub project_id: Tsid,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub release: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub status_code: StatusCode,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub attributes: JsonValue,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub service_version: Option<String>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub observation_count: u64,
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub event_ts: DateTime<Utc>,
}

impl Trace {
    /// Recompute `duration_ms` from start/end times.
    pub fn recompute_duration(&mut self) {
        self.duration_ms = duration_ms(self.start_time, self.end_time);
    }

    /// Apply a partial update. Absent fields preserve the current value;
    /// id, project, version, event_ts, and the soft-delete flag are immutable
    /// here (version moves in the store layer).
    pub fn merge(&mut self, update: &TraceUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(user_id) = &update.user_id {
            self.user_id = Some(user_id.clone());
        }
        if let Some(session_id) = &update.session_id {
            self.session_id = Some(session_id.clone());
        }
        if let Some(input) = &update.input {
            self.input = Some(input.clone());
        }
        if let Some(output) = &update.output {
            self.output = Some(output.clone());
        }
        if let Some(metadata) = &update.metadata {
            self.metadata.extend(metadata.clone());
        }
        if let Some(tags) = &update.tags {
            self.tags = tags.clone();
        }
        if let Some(environment) = &update.environment {
            self.environment = environment.clone();
        }
        if let Some(release) = &update.release {
            self.release = Some(release.clone());
        }
        if let Some(start_time) = update.start_time {
            self.start_time = start_time;
        }
        if let Some(end_time) = update.end_time {
            self.end_time = Some(end_time);
        }
        if let Some(status_code) = update.status_code {
            self.status_code = status_code;
        }
        if let Some(status_message) = &update.status_message {
            self.status_message = Some(status_message.clone());
        }
        if let Some(attributes) = &update.attributes {
            self.attributes = attributes.clone();
        }
        if let Some(service_name) = &update.service_name {
            self.service_name = Some(service_name.clone());
        }
        if let Some(service_version) = &update.service_version {
            self.service_version = Some(service_version.clone());
        }
        if let Some(bookmarked) = update.bookmarked {
            self.bookmarked = bookmarked;
        }
        if let Some(public) = update.public {
            self.public = public;
        }
        if update.start_time.is_some() || update.end_time.is_some() {
            self.recompute_duration();
        }
    }
}

/// Partial trace update as carried by a `trace.update` event payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceUpdate {
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub tags: Option<Vec<String>>,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status_code: Option<StatusCode>,
    pub status_message: Option<String>,
    pub attributes: Option<JsonValue>,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    pub bookmarked: Option<bool>,
    pub public: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace() -> Trace {
        Trace {
            id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            project_id: Tsid::generate(),
            name: "chat-request".to_string(),
            user_id: Some("user-1".to_string()),
            session_id: None,
            input: Some("hi".to_string()),
            output: None,
            metadata: HashMap::from([("env".to_string(), "test".to_string())]),
            tags: vec!["a".to_string()],
            environment: "production".to_string(),
            release: None,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status_code: StatusCode::Unset,
            status_message: None,
            attributes: serde_json::json!({}),
            service_name: None,
            service_version: None,
            total_cost: 0.0,
            total_tokens: 0,
            observation_count: 0,
            bookmarked: false,
            public: false,
            is_deleted: false,
            version: 1,
            event_ts: Utc::now(),
        }
    }

    #[test]
    fn test_merge_empty_update_is_identity() {
        let original = sample_trace();
        let mut merged = original.clone();
        merged.merge(&TraceUpdate::default());

        assert_eq!(merged.name, original.name);
        assert_eq!(merged.user_id, original.user_id);
        assert_eq!(merged.input, original.input);
        assert_eq!(merged.tags, original.tags);
        assert_eq!(merged.status_code, original.status_code);
        assert_eq!(merged.version, original.version);
    }

    #[test]
    fn test_merge_overwrites_only_set_fields() {
        let mut trace = sample_trace();
        trace.merge(&TraceUpdate {
            output: Some("42".to_string()),
            status_code: Some(StatusCode::Ok),
            ..Default::default()
        });

        assert_eq!(trace.output.as_deref(), Some("42"));
        assert_eq!(trace.status_code, StatusCode::Ok);
        // Everything else untouched
        assert_eq!(trace.name, "chat-request");
        assert_eq!(trace.input.as_deref(), Some("hi"));
        assert_eq!(trace.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_merge_recomputes_duration_on_end_time() {
        let mut trace = sample_trace();
        let end = trace.start_time + chrono::Duration::milliseconds(1_500);
        trace.merge(&TraceUpdate {
            end_time: Some(end),
            ..Default::default()
        });
        assert_eq!(trace.duration_ms, Some(1_500));
    }

    #[test]
    fn test_merge_extends_metadata() {
        let mut trace = sample_trace();
        trace.merge(&TraceUpdate {
            metadata: Some(HashMap::from([(
                "region".to_string(),
                "eu".to_string(),
            )])),
            ..Default::default()
        });
        assert_eq!(trace.metadata.len(), 2);
        assert_eq!(trace.metadata.get("env").map(String::as_str), Some("test"));
        assert_eq!(trace.metadata.get("region").map(String::as_str), Some("eu"));
    }
}
