//! Tenant identification from inbound payloads.
//!
//! The platform places the object id in different spots depending on the
//! event family. Each strategy looks at one spot; they are tried in a fixed
//! order and the first match wins.

use serde_json::Value;

/// A single extraction strategy.
pub type ExtractionStrategy = fn(&Value) -> Option<String>;

/// Strategies in priority order.
pub const STRATEGIES: [(&str, ExtractionStrategy); 4] = [
    ("entry[0].id", entry_id),
    ("object_id", object_id_field),
    ("object", object_field),
    ("page.id", page_id),
];

/// Extracts the tenant object id from raw payload bytes.
///
/// Returns `None` for non-JSON bodies and for payloads where no strategy
/// matches.
pub fn extract_object_id(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_slice(payload).ok()?;
    extract_from_value(&value)
}

/// Extracts the tenant object id from an already parsed payload.
pub fn extract_from_value(value: &Value) -> Option<String> {
    STRATEGIES.iter().find_map(|(_, strategy)| strategy(value))
}

fn entry_id(value: &Value) -> Option<String> {
    value.get("entry")?.get(0)?.get("id").and_then(as_identifier)
}

fn object_id_field(value: &Value) -> Option<String> {
    value.get("object_id").and_then(as_identifier)
}

fn object_field(value: &Value) -> Option<String> {
    value.get("object").and_then(as_identifier)
}

fn page_id(value: &Value) -> Option<String> {
    value.get("page")?.get("id").and_then(as_identifier)
}

fn as_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(value: Value) -> Option<String> {
        extract_object_id(value.to_string().as_bytes())
    }

    #[test]
    fn test_entry_id_has_priority() {
        let payload = json!({
            "object": "page",
            "object_id": "from-object-id",
            "entry": [{ "id": "1234567890", "time": 1700000000 }]
        });
        assert_eq!(extract(payload), Some("1234567890".to_string()));
    }

    #[test]
    fn test_object_id_field() {
        let payload = json!({ "object_id": "777", "object": "group" });
        assert_eq!(extract(payload), Some("777".to_string()));
    }

    #[test]
    fn test_object_field() {
        let payload = json!({ "object": "page" });
        assert_eq!(extract(payload), Some("page".to_string()));
    }

    #[test]
    fn test_page_id_field() {
        let payload = json!({ "page": { "id": 42 } });
        assert_eq!(extract(payload), Some("42".to_string()));
    }

    #[test]
    fn test_numeric_entry_id() {
        let payload = json!({ "entry": [{ "id": 987654321 }] });
        assert_eq!(extract(payload), Some("987654321".to_string()));
    }

    #[test]
    fn test_empty_values_do_not_match() {
        let payload = json!({ "entry": [{ "id": "" }], "object_id": "fallback" });
        assert_eq!(extract(payload), Some("fallback".to_string()));
    }

    #[test]
    fn test_no_identifier() {
        assert_eq!(extract(json!({ "entry": [] })), None);
        assert_eq!(extract(json!({ "object": null })), None);
        assert_eq!(extract_object_id(b"not json"), None);
        assert_eq!(extract_object_id(b""), None);
    }
}
