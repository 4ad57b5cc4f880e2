use serde_json::Value;

/// Message produced by one generation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMessage {
    pub topic: String,
    pub payload: String,
}

impl GeneratedMessage {
    /// Strings go out verbatim, `null` as an empty payload, anything else as
    /// JSON text.
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_serialisation() {
        assert_eq!(GeneratedMessage::new("t", json!("on")).payload, "on");
        assert_eq!(GeneratedMessage::new("t", json!(21.5)).payload, "21.5");
        assert_eq!(GeneratedMessage::new("t", json!(null)).payload, "");
        assert_eq!(
            GeneratedMessage::new("t", json!({"b": 1, "a": [true]})).payload,
            r#"{"b":1,"a":[true]}"#
        );
    }
}
