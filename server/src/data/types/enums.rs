//! Classification enums shared across the storage and domain layers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// STATUS
// ============================================================================

/// Span/trace status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "UNSET",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }

    /// Lenient parse for values coming from storage or span attributes.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "OK" => Self::Ok,
            "ERROR" => Self::Error,
            _ => Self::Unset,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// OBSERVATION TYPE
// ============================================================================

/// Observation (span) types for LLM telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationType {
    #[default]
    Span,
    Generation,
    Llm,
    Embedding,
    Retrieval,
    Agent,
    Tool,
    Chain,
    Event,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Span => "SPAN",
            Self::Generation => "GENERATION",
            Self::Llm => "LLM",
            Self::Embedding => "EMBEDDING",
            Self::Retrieval => "RETRIEVAL",
            Self::Agent => "AGENT",
            Self::Tool => "TOOL",
            Self::Chain => "CHAIN",
            Self::Event => "EVENT",
        }
    }

    /// Lenient parse for values coming from span attributes.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GENERATION" => Self::Generation,
            "LLM" => Self::Llm,
            "EMBEDDING" => Self::Embedding,
            "RETRIEVAL" | "RETRIEVER" => Self::Retrieval,
            "AGENT" => Self::Agent,
            "TOOL" => Self::Tool,
            "CHAIN" => Self::Chain,
            "EVENT" => Self::Event,
            _ => Self::Span,
        }
    }
}

// ============================================================================
// SCORE ENUMS
// ============================================================================

/// Value kind of a quality score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScoreDataType {
    Numeric,
    Categorical,
    Boolean,
}

impl ScoreDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "NUMERIC",
            Self::Categorical => "CATEGORICAL",
            Self::Boolean => "BOOLEAN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NUMERIC" => Some(Self::Numeric),
            "CATEGORICAL" => Some(Self::Categorical),
            "BOOLEAN" => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// Origin of a quality score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScoreSource {
    #[default]
    Auto,
    Manual,
    Eval,
}

impl ScoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
            Self::Eval => "EVAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "MANUAL" => Self::Manual,
            "EVAL" => Self::Eval,
            _ => Self::Auto,
        }
    }
}

// ============================================================================
// EVENT TYPE
// ============================================================================

/// Kinds of telemetry events accepted by the ingest path.
///
/// The wire strings are the dotted forms used by SDK batches and stream
/// envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "trace.create")]
    TraceCreate,
    #[serde(rename = "trace.update")]
    TraceUpdate,
    #[serde(rename = "observation.create")]
    ObservationCreate,
    #[serde(rename = "observation.update")]
    ObservationUpdate,
    #[serde(rename = "observation.complete")]
    ObservationComplete,
    #[serde(rename = "quality_score.create")]
    ScoreCreate,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TraceCreate => "trace.create",
            Self::TraceUpdate => "trace.update",
            Self::ObservationCreate => "observation.create",
            Self::ObservationUpdate => "observation.update",
            Self::ObservationComplete => "observation.complete",
            Self::ScoreCreate => "quality_score.create",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace.create" => Ok(Self::TraceCreate),
            "trace.update" => Ok(Self::TraceUpdate),
            "observation.create" => Ok(Self::ObservationCreate),
            "observation.update" => Ok(Self::ObservationUpdate),
            "observation.complete" => Ok(Self::ObservationComplete),
            "quality_score.create" => Ok(Self::ScoreCreate),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}
