//! Quality score entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::utils::tsid::Tsid;

use super::enums::{ScoreDataType, ScoreSource};

/// A quality score attached to exactly one of trace, observation, or session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub id: Tsid,
    pub project_id: Tsid,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub observation_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub name: String,
    pub data_type: ScoreDataType,
    #[serde(default)]
    pub numeric_value: Option<f64>,
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub source: ScoreSource,
    #[serde(default)]
    pub evaluator_name: Option<String>,
    #[serde(default)]
    pub evaluator_version: Option<String>,
    #[serde(default)]
    pub evaluator_config: JsonValue,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub event_ts: DateTime<Utc>,
}

impl Score {
    /// Number of non-null targets (trace, observation, session).
    pub fn target_count(&self) -> usize {
        [
            self.trace_id.is_some(),
            self.observation_id.is_some(),
            self.session_id.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Whether the data_type / value pairing is consistent:
    /// NUMERIC ⇒ numeric set, string null; CATEGORICAL ⇒ string set, numeric
    /// null; BOOLEAN ⇒ numeric in {0, 1}, string null.
    pub fn values_consistent(&self) -> bool {
        match self.data_type {
            ScoreDataType::Numeric => {
                self.numeric_value.is_some() && self.string_value.is_none()
            }
            ScoreDataType::Categorical => {
                self.string_value.is_some() && self.numeric_value.is_none()
            }
            ScoreDataType::Boolean => {
                matches!(self.numeric_value, Some(v) if v == 0.0 || v == 1.0)
                    && self.string_value.is_none()
            }
        }
    }
}
