//! OTLP attribute flattening and lookup helpers

use std::collections::BTreeMap;

use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value::Value};
use serde_json::{Value as JsonValue, json};

/// Flattened attribute map. BTreeMap keeps the serialized `attributes`
/// column deterministic.
pub type AttrMap = BTreeMap<String, JsonValue>;

/// Convert an OTLP `AnyValue` to JSON.
pub fn any_value_to_json(value: &AnyValue) -> JsonValue {
    match &value.value {
        Some(Value::StringValue(s)) => json!(s),
        Some(Value::BoolValue(b)) => json!(b),
        Some(Value::IntValue(i)) => json!(i),
        Some(Value::DoubleValue(d)) => json!(d),
        Some(Value::ArrayValue(array)) => {
            JsonValue::Array(array.values.iter().map(any_value_to_json).collect())
        }
        Some(Value::KvlistValue(kvlist)) => {
            let mut map = serde_json::Map::new();
            for kv in &kvlist.values {
                if let Some(v) = &kv.value {
                    map.insert(kv.key.clone(), any_value_to_json(v));
                }
            }
            JsonValue::Object(map)
        }
        Some(Value::BytesValue(bytes)) => json!(hex::encode(bytes)),
        None => JsonValue::Null,
    }
}

/// Merge attribute layers into one map. Later layers win, so call with
/// resource first, then scope, then span (precedence resource < scope <
/// span).
pub fn merge_attributes(layers: &[&[KeyValue]]) -> AttrMap {
    let mut merged = AttrMap::new();
    for layer in layers {
        for kv in *layer {
            if let Some(value) = &kv.value {
                merged.insert(kv.key.clone(), any_value_to_json(value));
            }
        }
    }
    merged
}

/// String view of an attribute (strings verbatim, scalars stringified).
pub fn get_str(attrs: &AttrMap, key: &str) -> Option<String> {
    match attrs.get(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// First matching string value from a list of keys.
pub fn get_first_str(attrs: &AttrMap, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| get_str(attrs, k))
}

pub fn get_f64(attrs: &AttrMap, key: &str) -> Option<f64> {
    match attrs.get(key)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn get_u64(attrs: &AttrMap, key: &str) -> Option<u64> {
    match attrs.get(key)? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn get_i64(attrs: &AttrMap, key: &str) -> Option<i64> {
    match attrs.get(key)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// The attribute map serialized for the `attributes` column.
pub fn to_json(attrs: &AttrMap) -> JsonValue {
    JsonValue::Object(attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}
