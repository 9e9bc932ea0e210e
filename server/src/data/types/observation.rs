//! Observation (span) entity and partial-update merging

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::utils::time::duration_ms;
use crate::utils::tsid::Tsid;

use super::enums::{ObservationType, StatusCode};

/// A sub-operation within a trace.
///
/// `id` is the OTLP span id (16 hex chars). Inline `input`/`output` may be
/// nulled out when the payload was offloaded to blob storage, in which case
/// the corresponding blob id is set; the previews are always populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub trace_id: String,
    #[serde(default)]
    pub parent_observation_id: Option<String>,
    pub project_id: Tsid,
    pub name: String,
    #[serde(default)]
    pub span_kind: Option<String>,
    #[serde(default, rename = "type")]
    pub observation_type: ObservationType,
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
    pub level: Option<String>,
    #[serde(default)]
    pub attributes: JsonValue,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub input_preview: String,
    #[serde(default)]
    pub output_preview: String,
    #[serde(default)]
    pub input_blob_id: Option<String>,
    #[serde(default)]
    pub output_blob_id: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_provider: Option<String>,
    #[serde(default)]
    pub internal_model_id: Option<String>,
    #[serde(default)]
    pub model_parameters: JsonValue,
    #[serde(default)]
    pub provided_usage_details: HashMap<String, u64>,
    #[serde(default)]
    pub usage_details: HashMap<String, u64>,
    #[serde(default)]
    pub provided_cost_details: HashMap<String, f64>,
    #[serde(default)]
    pub cost_details: HashMap<String, f64>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub prompt_name: Option<String>,
    #[serde(default)]
    pub prompt_version: Option<String>,
    #[serde(default)]
    pub time_to_first_token_ms: Option<i64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub event_ts: DateTime<Utc>,
}

impl Observation {
    /// Recompute `duration_ms` from start/end times.
    pub fn recompute_duration(&mut self) {
        self.duration_ms = duration_ms(self.start_time, self.end_time);
    }

    /// Whether the observation has been completed (end time recorded).
    pub fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Apply a partial update; absent fields preserve current values.
    pub fn merge(&mut self, update: &ObservationUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(parent) = &update.parent_observation_id {
            self.parent_observation_id = Some(parent.clone());
        }
        if let Some(ty) = update.observation_type {
            self.observation_type = ty;
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
        if let Some(level) = &update.level {
            self.level = Some(level.clone());
        }
        if let Some(attributes) = &update.attributes {
            self.attributes = attributes.clone();
        }
        if let Some(input) = &update.input {
            self.input = Some(input.clone());
        }
        if let Some(output) = &update.output {
            self.output = Some(output.clone());
        }
        if let Some(model_name) = &update.model_name {
            self.model_name = Some(model_name.clone());
        }
        if let Some(model_provider) = &update.model_provider {
            self.model_provider = Some(model_provider.clone());
        }
        if let Some(model_parameters) = &update.model_parameters {
            self.model_parameters = model_parameters.clone();
        }
        if let Some(usage) = &update.usage_details {
            self.provided_usage_details = usage.clone();
        }
        if let Some(cost) = &update.cost_details {
            self.provided_cost_details = cost.clone();
        }
        if let Some(prompt_id) = &update.prompt_id {
            self.prompt_id = Some(prompt_id.clone());
        }
        if let Some(prompt_name) = &update.prompt_name {
            self.prompt_name = Some(prompt_name.clone());
        }
        if let Some(prompt_version) = &update.prompt_version {
            self.prompt_version = Some(prompt_version.clone());
        }
        if let Some(ttft) = update.time_to_first_token_ms {
            self.time_to_first_token_ms = Some(ttft);
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(error_message) = &update.error_message {
            self.error_message = Some(error_message.clone());
        }
        if update.start_time.is_some() || update.end_time.is_some() {
            self.recompute_duration();
        }
    }
}

/// Partial observation update as carried by `observation.update` and
/// `observation.complete` event payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationUpdate {
    pub name: Option<String>,
    pub parent_observation_id: Option<String>,
    #[serde(rename = "type")]
    pub observation_type: Option<ObservationType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status_code: Option<StatusCode>,
    pub status_message: Option<String>,
    pub level: Option<String>,
    pub attributes: Option<JsonValue>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub model_name: Option<String>,
    pub model_provider: Option<String>,
    pub model_parameters: Option<JsonValue>,
    pub usage_details: Option<HashMap<String, u64>>,
    pub cost_details: Option<HashMap<String, f64>>,
    pub prompt_id: Option<String>,
    pub prompt_name: Option<String>,
    pub prompt_version: Option<String>,
    pub time_to_first_token_ms: Option<i64>,
    pub retry_count: Option<u32>,
    pub error_message: Option<String>,
}
