//! Human-readable rendering of result payloads.

use crate::Result;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

/// Pretty JSON with object keys sorted and a four-space indent.
pub fn to_pretty_json(value: &Value) -> Result<String> {
    let sorted = sort_keys(value);
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    sorted.serialize(&mut serializer)?;
    String::from_utf8(out).map_err(|e| crate::NsoError::Json {
        message: format!("rendered JSON is not UTF-8: {}", e),
        source: None,
    })
}

/// YAML rendering of `value`.
pub fn to_yaml(value: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(&sort_keys(value))?)
}

// serde_json keeps insertion order only with `preserve_order`; rebuild
// objects explicitly so the output is sorted either way.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
