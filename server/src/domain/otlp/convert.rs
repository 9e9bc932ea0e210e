//! OTLP span conversion
//!
//! Normalizes OTLP `ResourceSpans` into internal telemetry events: one
//! `observation.create` per span, plus a synthesized `trace.create` for each
//! root span. Attribute precedence is resource < scope < span; the merged
//! map is preserved verbatim in the `attributes` column alongside the typed
//! extractions.

use std::collections::HashMap;

use chrono::Utc;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::Span;

use crate::data::types::{
    EventType, Observation, ObservationType, StatusCode, TelemetryEvent, Trace,
};
use crate::domain::DomainError;
use crate::utils::time::nanos_to_datetime;
use crate::utils::tsid::Tsid;

use super::attributes::{
    AttrMap, get_f64, get_first_str, get_i64, get_str, get_u64, merge_attributes, to_json,
};

// GenAI semantic convention keys
const ATTR_PROVIDER: &str = "gen_ai.provider.name";
const ATTR_RESPONSE_MODEL: &str = "gen_ai.response.model";
const ATTR_REQUEST_MODEL: &str = "gen_ai.request.model";
const ATTR_INPUT_MESSAGES: &str = "gen_ai.input.messages";
const ATTR_OUTPUT_MESSAGES: &str = "gen_ai.output.messages";
const ATTR_OPERATION_NAME: &str = "gen_ai.operation.name";
const ATTR_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
const ATTR_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
const ATTR_TTFT: &str = "gen_ai.server.time_to_first_token";

const REQUEST_PARAM_KEYS: [(&str, &str); 6] = [
    ("gen_ai.request.temperature", "temperature"),
    ("gen_ai.request.max_tokens", "max_tokens"),
    ("gen_ai.request.top_p", "top_p"),
    ("gen_ai.request.top_k", "top_k"),
    ("gen_ai.request.frequency_penalty", "frequency_penalty"),
    ("gen_ai.request.presence_penalty", "presence_penalty"),
];

// Vendor-scoped keys
const ATTR_COST_TOTAL: &str = "brokle.cost.total";
const ATTR_COST_INPUT: &str = "brokle.cost.input";
const ATTR_COST_OUTPUT: &str = "brokle.cost.output";
const ATTR_PROMPT_ID: &str = "brokle.prompt.id";
const ATTR_PROMPT_NAME: &str = "brokle.prompt.name";
const ATTR_PROMPT_VERSION: &str = "brokle.prompt.version";
const METADATA_PREFIXES: [&str; 3] = ["brokle.cache.", "brokle.routing.", "brokle.governance."];

// General conventions
const ATTR_SESSION_ID: &str = "session.id";
const ATTR_USER_ID: &str = "user.id";
const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_VERSION: &str = "service.version";
const ENVIRONMENT_KEYS: [&str; 2] = ["deployment.environment.name", "deployment.environment"];

/// A parent span id is null when absent, empty, all-zero bytes, or the
/// literal string "0000000000000000".
pub fn parent_span_id_is_null(parent_span_id: &[u8]) -> bool {
    parent_span_id.is_empty()
        || parent_span_id.iter().all(|b| *b == 0)
        || parent_span_id == b"0000000000000000"
}

/// Convert an OTLP export request into internal telemetry events.
///
/// Rejects the whole request when any span carries a malformed trace/span
/// id (trace ids are 16 bytes, span ids 8 bytes on the wire).
pub fn convert_export_request(
    project_id: Tsid,
    request: &ExportTraceServiceRequest,
) -> Result<Vec<TelemetryEvent>, DomainError> {
    let mut events = Vec::new();

    for resource_spans in &request.resource_spans {
        let resource_attrs: &[_] = resource_spans
            .resource
            .as_ref()
            .map(|r| r.attributes.as_slice())
            .unwrap_or_default();

        for scope_spans in &resource_spans.scope_spans {
            let scope_attrs: &[_] = scope_spans
                .scope
                .as_ref()
                .map(|s| s.attributes.as_slice())
                .unwrap_or_default();

            for span in &scope_spans.spans {
                let attrs =
                    merge_attributes(&[resource_attrs, scope_attrs, span.attributes.as_slice()]);
                convert_span(project_id, span, &attrs, &mut events)?;
            }
        }
    }

    Ok(events)
}

fn convert_span(
    project_id: Tsid,
    span: &Span,
    attrs: &AttrMap,
    events: &mut Vec<TelemetryEvent>,
) -> Result<(), DomainError> {
    if span.trace_id.len() != 16 {
        return Err(DomainError::Validation(format!(
            "OTLP trace id must be 16 bytes, got {}",
            span.trace_id.len()
        )));
    }
    if span.span_id.len() != 8 {
        return Err(DomainError::Validation(format!(
            "OTLP span id must be 8 bytes, got {}",
            span.span_id.len()
        )));
    }

    let trace_id = hex::encode(&span.trace_id);
    let span_id = hex::encode(&span.span_id);
    let start_time = nanos_to_datetime(span.start_time_unix_nano);

    // Root spans synthesize the trace event before their observation
    if parent_span_id_is_null(&span.parent_span_id) {
        let trace = build_trace(project_id, &trace_id, span, attrs);
        events.push(TelemetryEvent {
            event_id: Tsid::generate(),
            event_type: EventType::TraceCreate,
            payload: serde_json::to_value(&trace)
                .map_err(|e| DomainError::Internal(e.to_string()))?,
            timestamp: Some(start_time),
        });
    }

    let observation = build_observation(project_id, &trace_id, &span_id, span, attrs);
    events.push(TelemetryEvent {
        event_id: Tsid::generate(),
        event_type: EventType::ObservationCreate,
        payload: serde_json::to_value(&observation)
            .map_err(|e| DomainError::Internal(e.to_string()))?,
        timestamp: Some(start_time),
    });

    Ok(())
}

fn build_trace(project_id: Tsid, trace_id: &str, span: &Span, attrs: &AttrMap) -> Trace {
    let mut metadata = HashMap::new();
    for (key, value) in attrs {
        if METADATA_PREFIXES.iter().any(|p| key.starts_with(p)) {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            metadata.insert(key.clone(), rendered);
        }
    }

    let mut trace = Trace {
        id: trace_id.to_string(),
        project_id,
        name: span.name.clone(),
        user_id: get_str(attrs, ATTR_USER_ID),
        session_id: get_str(attrs, ATTR_SESSION_ID),
        input: get_str(attrs, ATTR_INPUT_MESSAGES),
        output: get_str(attrs, ATTR_OUTPUT_MESSAGES),
        metadata,
        tags: vec![],
        environment: get_first_str(attrs, &ENVIRONMENT_KEYS).unwrap_or_default(),
        release: None,
        start_time: nanos_to_datetime(span.start_time_unix_nano),
        end_time: (span.end_time_unix_nano > 0)
            .then(|| nanos_to_datetime(span.end_time_unix_nano)),
        duration_ms: None,
        status_code: status_code(span),
        status_message: status_message(span),
        attributes: to_json(attrs),
        service_name: get_str(attrs, ATTR_SERVICE_NAME),
        service_version: get_str(attrs, ATTR_SERVICE_VERSION),
        total_cost: get_f64(attrs, ATTR_COST_TOTAL).unwrap_or(0.0),
        total_tokens: 0,
        observation_count: 0,
        bookmarked: false,
        public: false,
        is_deleted: false,
        version: 0,
        event_ts: Utc::now(),
    };
    trace.recompute_duration();
    trace
}

fn build_observation(
    project_id: Tsid,
    trace_id: &str,
    span_id: &str,
    span: &Span,
    attrs: &AttrMap,
) -> Observation {
    let mut usage_details = HashMap::new();
    if let Some(input_tokens) = get_u64(attrs, ATTR_USAGE_INPUT_TOKENS) {
        usage_details.insert(
            crate::domain::observations::USAGE_INPUT.to_string(),
            input_tokens,
        );
    }
    if let Some(output_tokens) = get_u64(attrs, ATTR_USAGE_OUTPUT_TOKENS) {
        usage_details.insert(
            crate::domain::observations::USAGE_OUTPUT.to_string(),
            output_tokens,
        );
    }

    let mut cost_details = HashMap::new();
    for (attr, key) in [
        (ATTR_COST_TOTAL, crate::domain::observations::COST_TOTAL),
        (ATTR_COST_INPUT, crate::domain::observations::COST_INPUT),
        (ATTR_COST_OUTPUT, crate::domain::observations::COST_OUTPUT),
    ] {
        if let Some(value) = get_f64(attrs, attr) {
            cost_details.insert(key.to_string(), value);
        }
    }

    let mut model_parameters = serde_json::Map::new();
    for (attr, key) in REQUEST_PARAM_KEYS {
        if let Some(value) = attrs.get(attr)
            && !value.is_null()
        {
            model_parameters.insert(key.to_string(), value.clone());
        }
    }

    let mut observation = Observation {
        id: span_id.to_string(),
        trace_id: trace_id.to_string(),
        parent_observation_id: (!parent_span_id_is_null(&span.parent_span_id))
            .then(|| hex::encode(&span.parent_span_id)),
        project_id,
        name: span.name.clone(),
        span_kind: Some(span_kind_to_string(span.kind).to_string()),
        observation_type: classify(attrs),
        start_time: nanos_to_datetime(span.start_time_unix_nano),
        end_time: (span.end_time_unix_nano > 0)
            .then(|| nanos_to_datetime(span.end_time_unix_nano)),
        duration_ms: None,
        status_code: status_code(span),
        status_message: status_message(span),
        level: None,
        attributes: to_json(attrs),
        input: get_str(attrs, ATTR_INPUT_MESSAGES),
        output: get_str(attrs, ATTR_OUTPUT_MESSAGES),
        input_preview: String::new(),
        output_preview: String::new(),
        input_blob_id: None,
        output_blob_id: None,
        model_name: get_str(attrs, ATTR_RESPONSE_MODEL)
            .or_else(|| get_str(attrs, ATTR_REQUEST_MODEL)),
        model_provider: get_str(attrs, ATTR_PROVIDER),
        internal_model_id: None,
        model_parameters: serde_json::Value::Object(model_parameters),
        provided_usage_details: usage_details,
        usage_details: HashMap::new(),
        provided_cost_details: cost_details,
        cost_details: HashMap::new(),
        prompt_id: get_str(attrs, ATTR_PROMPT_ID),
        prompt_name: get_str(attrs, ATTR_PROMPT_NAME),
        prompt_version: get_str(attrs, ATTR_PROMPT_VERSION),
        time_to_first_token_ms: get_f64(attrs, ATTR_TTFT).map(|secs| (secs * 1_000.0) as i64),
        retry_count: 0,
        error_message: None,
        is_deleted: false,
        version: 0,
        event_ts: Utc::now(),
    };
    observation.recompute_duration();

    // ttft may also be reported in milliseconds directly
    if observation.time_to_first_token_ms.is_none() {
        observation.time_to_first_token_ms = get_i64(attrs, "gen_ai.server.ttft_ms");
    }

    observation
}

/// Observation type from the GenAI operation name, falling back to token
/// usage as a generation signal.
fn classify(attrs: &AttrMap) -> ObservationType {
    if let Some(operation) = get_str(attrs, ATTR_OPERATION_NAME) {
        return match operation.as_str() {
            "chat" | "text_completion" | "generate_content" => ObservationType::Generation,
            "embeddings" | "embed" => ObservationType::Embedding,
            "execute_tool" => ObservationType::Tool,
            "invoke_agent" | "create_agent" => ObservationType::Agent,
            "retrieve" => ObservationType::Retrieval,
            other => ObservationType::parse(other),
        };
    }
    if attrs.contains_key(ATTR_USAGE_INPUT_TOKENS) || attrs.contains_key(ATTR_USAGE_OUTPUT_TOKENS)
    {
        return ObservationType::Generation;
    }
    ObservationType::Span
}

fn span_kind_to_string(kind: i32) -> &'static str {
    match kind {
        1 => "INTERNAL",
        2 => "SERVER",
        3 => "CLIENT",
        4 => "PRODUCER",
        5 => "CONSUMER",
        _ => "UNSPECIFIED",
    }
}

fn status_code(span: &Span) -> StatusCode {
    match span.status.as_ref().map(|s| s.code) {
        Some(1) => StatusCode::Ok,
        Some(2) => StatusCode::Error,
        _ => StatusCode::Unset,
    }
}

fn status_message(span: &Span) -> Option<String> {
    span.status
        .as_ref()
        .filter(|s| !s.message.is_empty())
        .map(|s| s.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value::Value};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Status};

    fn kv_str(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(Value::StringValue(value.to_string())),
            }),
        }
    }

    fn kv_int(key: &str, value: i64) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(Value::IntValue(value)),
            }),
        }
    }

    fn kv_f64(key: &str, value: f64) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(Value::DoubleValue(value)),
            }),
        }
    }

    fn base_span(parent: Vec<u8>) -> Span {
        Span {
            trace_id: vec![0xab; 16],
            span_id: vec![0xcd; 8],
            parent_span_id: parent,
            name: "chat gpt-4o".to_string(),
            kind: 3,
            start_time_unix_nano: 1_700_000_000_000_000_000,
            end_time_unix_nano: 1_700_000_001_500_000_000,
            status: Some(Status {
                message: String::new(),
                code: 1,
            }),
            ..Default::default()
        }
    }

    fn request_with(span: Span, resource_attrs: Vec<KeyValue>) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: resource_attrs,
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![span],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    #[test]
    fn test_root_detection_null_forms() {
        assert!(parent_span_id_is_null(&[]));
        assert!(parent_span_id_is_null(&[0u8; 8]));
        assert!(parent_span_id_is_null(b"0000000000000000"));
        assert!(!parent_span_id_is_null(&[1, 2, 3, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn test_root_span_synthesizes_trace_event() {
        let request = request_with(base_span(vec![]), vec![]);
        let events = convert_export_request(Tsid::generate(), &request).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::TraceCreate);
        assert_eq!(events[1].event_type, EventType::ObservationCreate);

        let trace: Trace = serde_json::from_value(events[0].payload.clone()).unwrap();
        assert_eq!(trace.id, hex::encode([0xab; 16]));
        assert_eq!(trace.duration_ms, Some(1_500));
        assert_eq!(trace.status_code, StatusCode::Ok);
    }

    #[test]
    fn test_all_zero_parent_is_root() {
        let request = request_with(base_span(vec![0u8; 8]), vec![]);
        let events = convert_export_request(Tsid::generate(), &request).unwrap();
        assert_eq!(events[0].event_type, EventType::TraceCreate);
    }

    #[test]
    fn test_child_span_no_trace_event() {
        let request = request_with(base_span(vec![1, 2, 3, 4, 5, 6, 7, 8]), vec![]);
        let events = convert_export_request(Tsid::generate(), &request).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ObservationCreate);
        let observation: Observation =
            serde_json::from_value(events[0].payload.clone()).unwrap();
        assert_eq!(
            observation.parent_observation_id.as_deref(),
            Some("0102030405060708")
        );
    }

    #[test]
    fn test_genai_extraction() {
        let mut span = base_span(vec![]);
        span.attributes = vec![
            kv_str("gen_ai.provider.name", "openai"),
            kv_str("gen_ai.request.model", "gpt-4o"),
            kv_str("gen_ai.response.model", "gpt-4o-2024-08-06"),
            kv_str("gen_ai.operation.name", "chat"),
            kv_str("gen_ai.input.messages", r#"[{"role":"user"}]"#),
            kv_int("gen_ai.usage.input_tokens", 12),
            kv_int("gen_ai.usage.output_tokens", 34),
            kv_f64("gen_ai.request.temperature", 0.2),
            kv_int("gen_ai.request.max_tokens", 256),
            kv_f64("brokle.cost.input", 0.001),
            kv_f64("brokle.cost.output", 0.002),
            kv_str("brokle.prompt.name", "support-agent"),
        ];
        let request = request_with(span, vec![]);
        let events = convert_export_request(Tsid::generate(), &request).unwrap();

        let observation: Observation =
            serde_json::from_value(events[1].payload.clone()).unwrap();
        assert_eq!(observation.model_provider.as_deref(), Some("openai"));
        // Response model preferred over request model
        assert_eq!(observation.model_name.as_deref(), Some("gpt-4o-2024-08-06"));
        assert_eq!(observation.observation_type, ObservationType::Generation);
        assert_eq!(observation.provided_usage_details.get("input_tokens"), Some(&12));
        assert_eq!(observation.provided_usage_details.get("output_tokens"), Some(&34));
        assert_eq!(observation.provided_cost_details.get("input"), Some(&0.001));
        assert_eq!(observation.model_parameters["temperature"], 0.2);
        assert_eq!(observation.model_parameters["max_tokens"], 256);
        assert_eq!(observation.prompt_name.as_deref(), Some("support-agent"));
        assert_eq!(observation.input.as_deref(), Some(r#"[{"role":"user"}]"#));
        // Original attributes preserved verbatim
        assert_eq!(
            observation.attributes["gen_ai.provider.name"],
            serde_json::json!("openai")
        );
    }

    #[test]
    fn test_resource_attrs_flow_into_trace() {
        let span = base_span(vec![]);
        let request = request_with(
            span,
            vec![
                kv_str("service.name", "checkout"),
                kv_str("service.version", "1.2.3"),
                kv_str("deployment.environment.name", "staging"),
                kv_str("session.id", "sess-9"),
                kv_str("user.id", "user-3"),
                kv_str("brokle.routing.strategy", "latency"),
            ],
        );
        let events = convert_export_request(Tsid::generate(), &request).unwrap();
        let trace: Trace = serde_json::from_value(events[0].payload.clone()).unwrap();

        assert_eq!(trace.service_name.as_deref(), Some("checkout"));
        assert_eq!(trace.service_version.as_deref(), Some("1.2.3"));
        assert_eq!(trace.environment, "staging");
        assert_eq!(trace.session_id.as_deref(), Some("sess-9"));
        assert_eq!(trace.user_id.as_deref(), Some("user-3"));
        assert_eq!(
            trace.metadata.get("brokle.routing.strategy").map(String::as_str),
            Some("latency")
        );
    }

    #[test]
    fn test_malformed_ids_rejected() {
        let mut span = base_span(vec![]);
        span.trace_id = vec![0xab; 8]; // too short
        let request = request_with(span, vec![]);
        assert!(matches!(
            convert_export_request(Tsid::generate(), &request),
            Err(DomainError::Validation(_))
        ));

        let mut span = base_span(vec![]);
        span.span_id = vec![0xcd; 4];
        let request = request_with(span, vec![]);
        assert!(matches!(
            convert_export_request(Tsid::generate(), &request),
            Err(DomainError::Validation(_))
        ));
    }
}
