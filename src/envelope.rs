//! Core event types for the bridge.
//!
//! The [`EventEnvelope`] is the in-memory form of one event, shared by the
//! consumer side (built by decoding a stream entry) and the producer side
//! (built by application code before encoding).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// MIME type recorded for textual payloads.
pub const MIME_TEXT: &str = "text/plain";

/// MIME type recorded for structured payloads.
pub const MIME_JSON: &str = "application/json";

/// Free-form envelope metadata used for filtering and correlation.
pub type Headers = HashMap<String, Value>;

/// Event body.
///
/// Text is stored on the wire verbatim; structured values are serialized as
/// JSON with an `application/json` MIME type, so `Payload::Json` holding a
/// string survives the stream round trip. Through serde (and `From<Value>`)
/// a JSON string becomes [`Payload::Text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Json(Value),
}

impl Payload {
    /// MIME type implied by the payload representation.
    pub fn inferred_mime_type(&self) -> &'static str {
        match self {
            Payload::Text(_) => MIME_TEXT,
            Payload::Json(_) => MIME_JSON,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Text(_) => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => f.write_str(s),
            Payload::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => Payload::Text(s),
            other => Payload::Json(other),
        }
    }
}

/// One logical event.
///
/// # Example
///
/// ```rust
/// use streambridge::EventEnvelope;
/// use serde_json::json;
///
/// let envelope = EventEnvelope::new("OrderCreated")
///     .with_aggregate_id("o-1")
///     .with_payload(json!({"total": 42}))
///     .with_header("region", "US");
///
/// assert_eq!(envelope.event_type, "OrderCreated");
/// assert_eq!(envelope.header_str("region").as_deref(), Some("US"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Stream entry id; assigned by the store, so only present on consume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,

    /// Business entity the event concerns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,

    /// Event type used for filtering (wire field `event`)
    #[serde(rename = "event")]
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,

    /// Explicit MIME type; inferred from the payload when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Producer identity tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub headers: Headers,
}

impl EventEnvelope {
    /// Create an envelope with the given event type, timestamped now.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            entry_id: None,
            aggregate_id: None,
            event_type: event_type.into(),
            payload: None,
            mime_type: None,
            service_name: None,
            timestamp: Utc::now(),
            headers: Headers::new(),
        }
    }

    pub fn with_entry_id(mut self, id: impl Into<String>) -> Self {
        self.entry_id = Some(id.into());
        self
    }

    pub fn with_aggregate_id(mut self, id: impl Into<String>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a single header, replacing any previous value for the key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Effective MIME type: the explicit one, else inferred from the payload.
    pub fn effective_mime_type(&self) -> Option<&str> {
        self.mime_type
            .as_deref()
            .or_else(|| self.payload.as_ref().map(Payload::inferred_mime_type))
    }

    /// Canonical string form of a header value.
    pub fn header_str(&self, key: &str) -> Option<String> {
        self.headers.get(key).map(header_value_string)
    }
}

/// Render a header value the way filters compare it: strings verbatim,
/// everything else as its JSON text (`42`, `true`, `null`).
pub fn header_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let envelope = EventEnvelope::new("OrderCreated")
            .with_aggregate_id("o-1")
            .with_service_name("orders")
            .with_payload("hello")
            .with_header("region", "US");

        assert_eq!(envelope.event_type, "OrderCreated");
        assert_eq!(envelope.aggregate_id.as_deref(), Some("o-1"));
        assert_eq!(envelope.service_name.as_deref(), Some("orders"));
        assert_eq!(envelope.payload, Some(Payload::Text("hello".to_string())));
        assert!(envelope.entry_id.is_none());
        assert_eq!(envelope.headers.len(), 1);
    }

    #[test]
    fn test_new_envelope_has_empty_headers() {
        let envelope = EventEnvelope::new("Ping");
        assert!(envelope.headers.is_empty());
        assert!(envelope.payload.is_none());
        assert!(envelope.effective_mime_type().is_none());
    }

    #[test]
    fn test_effective_mime_type() {
        let text = EventEnvelope::new("A").with_payload("plain");
        assert_eq!(text.effective_mime_type(), Some(MIME_TEXT));

        let json = EventEnvelope::new("A").with_payload(json!({"k": 1}));
        assert_eq!(json.effective_mime_type(), Some(MIME_JSON));

        let overridden = EventEnvelope::new("A")
            .with_payload("{\"k\":1}")
            .with_mime_type(MIME_JSON);
        assert_eq!(overridden.effective_mime_type(), Some(MIME_JSON));
    }

    #[test]
    fn test_payload_from_json_string_is_text() {
        assert_eq!(Payload::from(json!("abc")), Payload::Text("abc".to_string()));
        assert_eq!(Payload::from(json!([1, 2])), Payload::Json(json!([1, 2])));
    }

    #[test]
    fn test_header_value_string() {
        assert_eq!(header_value_string(&json!("US")), "US");
        assert_eq!(header_value_string(&json!(42)), "42");
        assert_eq!(header_value_string(&json!(true)), "true");
        assert_eq!(header_value_string(&json!(1.5)), "1.5");
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let envelope = EventEnvelope::new("OrderCreated").with_aggregate_id("o-1");
        let json_str = serde_json::to_string(&envelope).unwrap();
        assert!(json_str.contains("\"event\":\"OrderCreated\""));
        assert!(json_str.contains("aggregateId"));
        assert!(!json_str.contains("entryId"));
    }
}
