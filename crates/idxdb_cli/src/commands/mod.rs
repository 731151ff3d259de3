//! CLI command implementations.

pub mod databases;
pub mod dump;
pub mod stores;

use idxdb_codec::Value;

/// Renders a value in a compact JSON-like form for terminal output.
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Date(ms) => format!("Date({ms})"),
        Value::Text(s) => format!("{s:?}"),
        Value::Bytes(b) => format!("<{} bytes>", b.len()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Map(pairs) => {
            let parts: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{k}: {}", format_value(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_scalars() {
        assert_eq!(format_value(&Value::Null), "null");
        assert_eq!(format_value(&Value::Number(1.5)), "1.5");
        assert_eq!(format_value(&Value::Text("x".into())), "\"x\"");
        assert_eq!(format_value(&Value::Bytes(vec![1, 2])), "<2 bytes>");
    }

    #[test]
    fn format_nested() {
        let value = Value::map(vec![
            ("id".to_string(), Value::Number(1.0)),
            (
                "tags".to_string(),
                Value::Array(vec![Value::Text("a".into())]),
            ),
        ]);
        assert_eq!(format_value(&value), "{id: 1, tags: [\"a\"]}");
    }
}
