use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An error as it crosses the handler/worker boundary.
///
/// Decoding rule: a JSON string becomes an error with that string as its
/// message; a JSON object becomes an error whose enumerable fields are
/// copied verbatim. Round-tripping preserves `name`, `message`, `stack`,
/// and any custom fields the worker attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDescriptor {
    /// A bare message string.
    Message(String),
    /// A structured error with arbitrary named fields.
    Fields(Map<String, Value>),
}

impl ErrorDescriptor {
    /// Build a descriptor from a `name`/`message` pair, the common case for
    /// errors raised inside a worker's method body.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::String(name.into()));
        fields.insert("message".to_string(), Value::String(message.into()));
        Self::Fields(fields)
    }

    /// The human-readable message, if one can be recovered.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Message(m) => Some(m.as_str()),
            Self::Fields(fields) => fields.get("message").and_then(Value::as_str),
        }
    }

    /// The error's `name` field, if present (structured errors only).
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Message(_) => None,
            Self::Fields(fields) => fields.get("name").and_then(Value::as_str),
        }
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(m) => write!(f, "{m}"),
            Self::Fields(fields) => match (self.name(), self.message()) {
                (Some(name), Some(message)) => write!(f, "{name}: {message}"),
                (None, Some(message)) => write!(f, "{message}"),
                _ => write!(f, "{}", Value::Object(fields.clone())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_input_round_trips_to_same_message() {
        let json = serde_json::json!("boom");
        let decoded: ErrorDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.message(), Some("boom"));
        let encoded = serde_json::to_value(&decoded).unwrap();
        assert_eq!(encoded, serde_json::json!("boom"));
    }

    #[test]
    fn object_input_round_trips_enumerable_fields() {
        let json = serde_json::json!({"name": "RangeError", "message": "oops", "code": 7});
        let decoded: ErrorDescriptor = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(decoded.name(), Some("RangeError"));
        assert_eq!(decoded.message(), Some("oops"));
        let encoded = serde_json::to_value(&decoded).unwrap();
        assert_eq!(encoded, json);
    }

    #[test]
    fn display_prefers_name_and_message() {
        let err = ErrorDescriptor::named("RangeError", "oops");
        assert_eq!(err.to_string(), "RangeError: oops");
    }
}
