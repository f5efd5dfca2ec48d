//! Required-field validation for product records.
use crate::model::{Record, ValidationOutcome};
use serde_json::Value;

/// Check `record` against `required_fields`, listing the missing ones in the
/// order they are required.
pub fn validate<S: AsRef<str>>(record: &Record, required_fields: &[S]) -> ValidationOutcome {
    let missing = required_fields
        .iter()
        .map(AsRef::as_ref)
        .filter(|field| !record.get(field).is_some_and(is_present))
        .map(str::to_string)
        .collect();
    ValidationOutcome::from_missing(missing)
}

/// Strings must be non-blank after trimming; other values must be non-null,
/// non-empty and not `false`/`0`.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
