//! Bounded payload previews
//!
//! Observations always carry an inline preview of their input/output, whether
//! or not the full payload was offloaded to blob storage. Previews are
//! truncated on a char boundary and are markup-safe: JSON payloads are
//! summarized from their textual content instead of slicing raw braces.

use serde_json::Value as JsonValue;

/// Default maximum preview length in characters
pub const DEFAULT_PREVIEW_LIMIT: usize = 1_000;

const ELLIPSIS: &str = "...";

/// Build a preview of a payload, at most `limit` characters.
///
/// JSON payloads are flattened to their string content (message text, values)
/// before truncation so a preview never ends mid-escape or mid-structure.
pub fn payload_preview(payload: &str, limit: usize) -> String {
    match serde_json::from_str::<JsonValue>(payload) {
        Ok(value) if !value.is_string() => {
            let mut text = String::new();
            collect_text(&value, &mut text, limit.saturating_mul(2));
            truncate_chars(text.trim(), limit)
        }
        Ok(JsonValue::String(s)) => truncate_chars(&s, limit),
        _ => truncate_chars(payload, limit),
    }
}

/// Truncate to at most `limit` characters, appending an ellipsis when cut.
pub fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let keep = limit.saturating_sub(ELLIPSIS.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Walk a JSON value collecting human-readable text, bounded by `cap` chars.
fn collect_text(value: &JsonValue, out: &mut String, cap: usize) {
    if out.len() >= cap {
        return;
    }
    match value {
        JsonValue::String(s) => {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(s);
        }
        JsonValue::Number(n) => {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&n.to_string());
        }
        JsonValue::Bool(b) => {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(if *b { "true" } else { "false" });
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_text(item, out, cap);
                if out.len() >= cap {
                    return;
                }
            }
        }
        JsonValue::Object(map) => {
            for v in map.values() {
                collect_text(v, out, cap);
                if out.len() >= cap {
                    return;
                }
            }
        }
        JsonValue::Null => {}
    }
}
