use serde_json::Value;

/// One message or event payload as decoded from the platform.
///
/// `serde_json::Value` is already the tagged variant the pipeline needs
/// (`Null | Bool | Number | String | Array | Object`), so filter and cleanup
/// pattern-match on it directly.
pub type Record = Value;

/// Key holding the structural kind of a record (e.g. `"Message"`, `"PeerUser"`).
pub const DISCRIMINATOR: &str = "_";

/// Values a cleaned mapping or sequence never keeps: `null`, `false`, `""`, `[]`.
///
/// Numeric zero is data (`views: 0`, `forwards: 0`) and is kept, as is `{}`.
pub fn is_prunable(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Truthiness used by the presence filters (media, forward, reply, reactions).
///
/// Zero counts as falsy, as does every empty container.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a scalar as the plain string a user would type on the command line.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric message id of a record, if it has one.
pub fn record_id(record: &Value) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}
