//! Wire codec between [`EventEnvelope`] and stream entry field maps.
//!
//! # Wire format
//!
//! ```text
//! Field        | Content
//! -------------|-------------------------------------------
//! event        | event type (omitted when empty)
//! aggregateId  | aggregate id (omitted when empty)
//! serviceName  | producer tag (omitted when empty)
//! timestamp    | ISO-8601 instant, e.g. 2025-01-01T00:00:00Z
//! payload      | text verbatim or JSON
//! mimeType     | text/plain | application/json
//! headers      | JSON object (omitted when there are no headers)
//! ```
//!
//! Headers always live under the single `headers` field. Entries written by
//! older producers that spliced headers in as top-level fields decode with a
//! warning and those fields are dropped.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::envelope::{EventEnvelope, Headers, Payload, MIME_JSON};

pub const FIELD_EVENT: &str = "event";
pub const FIELD_AGGREGATE_ID: &str = "aggregateId";
pub const FIELD_SERVICE_NAME: &str = "serviceName";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_PAYLOAD: &str = "payload";
pub const FIELD_MIME_TYPE: &str = "mimeType";
pub const FIELD_HEADERS: &str = "headers";

/// Field names with a fixed meaning on the wire.
pub const STANDARD_FIELDS: [&str; 7] = [
    FIELD_AGGREGATE_ID,
    FIELD_EVENT,
    FIELD_PAYLOAD,
    FIELD_SERVICE_NAME,
    FIELD_TIMESTAMP,
    FIELD_MIME_TYPE,
    FIELD_HEADERS,
];

/// Returns true if `name` is one of the reserved wire fields.
pub fn is_standard_field(name: &str) -> bool {
    STANDARD_FIELDS.contains(&name)
}

/// Something that was wrong with an entry but did not stop it from decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeIssue {
    /// Timestamp could not be parsed; the current time was used instead
    Timestamp(String),
    /// Headers field was not a JSON object; headers were left empty
    Headers(String),
    /// Non-standard top-level fields, sorted by name
    UnrecognizedFields(Vec<String>),
}

/// Result of decoding one stream entry.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub envelope: EventEnvelope,
    pub issues: Vec<DecodeIssue>,
}

impl Decoded {
    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Encode an envelope into the ordered field list written with XADD.
pub fn encode(envelope: &EventEnvelope) -> Vec<(String, String)> {
    let mut fields = Vec::with_capacity(STANDARD_FIELDS.len());

    push_non_empty(&mut fields, FIELD_EVENT, Some(&envelope.event_type));
    push_non_empty(&mut fields, FIELD_AGGREGATE_ID, envelope.aggregate_id.as_ref());
    push_non_empty(&mut fields, FIELD_SERVICE_NAME, envelope.service_name.as_ref());

    fields.push((
        FIELD_TIMESTAMP.to_string(),
        format_timestamp(&envelope.timestamp),
    ));

    if let Some(payload) = &envelope.payload {
        fields.push((FIELD_PAYLOAD.to_string(), serialize_payload(payload)));
        if let Some(mime_type) = envelope.effective_mime_type() {
            fields.push((FIELD_MIME_TYPE.to_string(), mime_type.to_string()));
        }
    }

    if !envelope.headers.is_empty() {
        match serde_json::to_string(&envelope.headers) {
            Ok(json) => fields.push((FIELD_HEADERS.to_string(), json)),
            Err(e) => warn!(error = %e, "Failed to serialize headers, omitting them"),
        }
    }

    fields
}

fn push_non_empty(fields: &mut Vec<(String, String)>, name: &str, value: Option<&String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        fields.push((name.to_string(), value.clone()));
    }
}

/// ISO-8601 instant in UTC with a `Z` suffix; sub-second digits only when set.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn serialize_payload(payload: &Payload) -> String {
    match payload {
        Payload::Text(text) => text.clone(),
        Payload::Json(value) => serde_json::to_string(value).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize payload as JSON, using display form");
            value.to_string()
        }),
    }
}

/// Decode a stream entry into an envelope.
///
/// Never fails: malformed optional data is replaced by defaults and reported
/// in [`Decoded::issues`] (and logged).
pub fn decode(entry_id: &str, fields: &HashMap<String, String>) -> Decoded {
    let mut issues = Vec::new();

    let event_type = fields.get(FIELD_EVENT).cloned().unwrap_or_default();
    let mime_type = non_empty(fields.get(FIELD_MIME_TYPE));

    let timestamp = match fields.get(FIELD_TIMESTAMP) {
        Some(raw) => parse_timestamp(raw).unwrap_or_else(|| {
            warn!(
                id = %entry_id,
                timestamp = %raw,
                "Failed to parse timestamp, using current time"
            );
            issues.push(DecodeIssue::Timestamp(raw.clone()));
            Utc::now()
        }),
        None => Utc::now(),
    };

    let payload = fields
        .get(FIELD_PAYLOAD)
        .map(|raw| decode_payload(raw, mime_type.as_deref()));

    let headers = match fields.get(FIELD_HEADERS) {
        Some(raw) => decode_headers(raw).unwrap_or_else(|e| {
            warn!(
                id = %entry_id,
                error = %e,
                "Failed to parse headers, continuing with empty headers"
            );
            issues.push(DecodeIssue::Headers(raw.clone()));
            Headers::new()
        }),
        None => Headers::new(),
    };

    let mut unrecognized: Vec<String> = fields
        .keys()
        .filter(|key| !is_standard_field(key))
        .cloned()
        .collect();
    if !unrecognized.is_empty() {
        unrecognized.sort();
        warn!(
            id = %entry_id,
            fields = ?unrecognized,
            "Ignoring unrecognized stream fields"
        );
        issues.push(DecodeIssue::UnrecognizedFields(unrecognized));
    }

    let envelope = EventEnvelope {
        entry_id: Some(entry_id.to_string()),
        aggregate_id: non_empty(fields.get(FIELD_AGGREGATE_ID)),
        event_type,
        payload,
        mime_type,
        service_name: non_empty(fields.get(FIELD_SERVICE_NAME)),
        timestamp,
        headers,
    };

    Decoded { envelope, issues }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Parse either an ISO-8601 instant or epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.contains(['T', 't']) {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    } else {
        raw.parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

fn decode_payload(raw: &str, mime_type: Option<&str>) -> Payload {
    if mime_type == Some(MIME_JSON) {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => return Payload::Json(value),
            Err(e) => debug!(error = %e, "JSON payload did not parse, keeping it as text"),
        }
    }
    Payload::Text(raw.to_string())
}

fn decode_headers(raw: &str) -> Result<Headers, serde_json::Error> {
    serde_json::from_str(raw)
}
