//! OTLP → internal event conversion

mod attributes;
mod convert;

pub use convert::{convert_export_request, parent_span_id_is_null};
