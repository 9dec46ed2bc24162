//! Publishing events to a stream.
//!
//! Three entry points, all ending in one XADD:
//!
//! - [`StreamProducer::publish`]: a ready-made [`EventEnvelope`]
//! - [`StreamProducer::produce`]: event type + payload, envelope filled in
//! - [`StreamProducer::publish_message`]: an untyped body plus metadata map,
//!   as received by the HTTP ingest

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::codec::{
    self, FIELD_AGGREGATE_ID, FIELD_EVENT, FIELD_MIME_TYPE, FIELD_SERVICE_NAME, FIELD_TIMESTAMP,
};
use crate::config::EndpointConfig;
use crate::envelope::{header_value_string, EventEnvelope, Headers, Payload};
use crate::error::BridgeError;
use crate::store::StreamStore;

/// Untyped message: a body and string-keyed metadata.
///
/// `event` is required in the metadata; `aggregateId`, `serviceName`,
/// `mimeType` and `timestamp` map onto envelope fields. The other reserved
/// wire names (`payload`, `headers`) are dropped and every remaining key
/// becomes a header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub body: Option<Payload>,
    pub metadata: HashMap<String, Value>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<Payload>) -> Self {
        Self {
            body: Some(body.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Appends events to one stream.
#[derive(Clone)]
pub struct StreamProducer {
    store: Arc<dyn StreamStore>,
    stream: String,
    service_name: Option<String>,
}

impl StreamProducer {
    pub fn new(store: Arc<dyn StreamStore>, stream: impl Into<String>) -> Result<Self, BridgeError> {
        let stream = stream.into();
        if stream.trim().is_empty() {
            return Err(BridgeError::config("stream key is required"));
        }

        Ok(Self {
            store,
            stream,
            service_name: None,
        })
    }

    /// Build a producer from an endpoint; `default_service` applies when the
    /// endpoint names no service of its own.
    pub fn from_endpoint(
        store: Arc<dyn StreamStore>,
        endpoint: &EndpointConfig,
        default_service: Option<&str>,
    ) -> Result<Self, BridgeError> {
        endpoint.validate_for_producer()?;

        let service = endpoint.service_name.as_deref().or(default_service);
        let producer = Self::new(store, endpoint.stream.clone())?;
        Ok(match service {
            Some(service) => producer.with_service_name(service),
            None => producer,
        })
    }

    /// Service name stamped on envelopes that carry none.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Encode and append an envelope, returning the new entry id.
    ///
    /// Envelopes without a service name get the producer's default. Append
    /// failures are returned as is; there is no retry.
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<String, BridgeError> {
        if envelope.event_type.trim().is_empty() {
            return Err(BridgeError::config("event type is required to publish"));
        }

        let fields = if envelope.service_name.is_none() && self.service_name.is_some() {
            let mut stamped = envelope.clone();
            stamped.service_name = self.service_name.clone();
            codec::encode(&stamped)
        } else {
            codec::encode(envelope)
        };

        let id = self
            .store
            .append(&self.stream, &fields)
            .await
            .map_err(|source| {
                error!(
                    stream = %self.stream,
                    event_type = %envelope.event_type,
                    error = %source,
                    "Failed to publish event"
                );
                BridgeError::Publish {
                    stream: self.stream.clone(),
                    source,
                }
            })?;

        debug!(
            stream = %self.stream,
            id = %id,
            event_type = %envelope.event_type,
            "Event published"
        );
        Ok(id)
    }

    /// Publish a payload under `event_type`, timestamped now.
    pub async fn produce(
        &self,
        event_type: &str,
        aggregate_id: Option<&str>,
        payload: impl Into<Payload>,
        mime_type: Option<&str>,
    ) -> Result<String, BridgeError> {
        let mut envelope = EventEnvelope::new(event_type).with_payload(payload);
        envelope.aggregate_id = aggregate_id.map(str::to_string);
        envelope.mime_type = mime_type.map(str::to_string);
        envelope.service_name = self.service_name.clone();

        self.publish(&envelope).await
    }

    /// Publish an untyped message; see [`OutboundMessage`] for the metadata keys.
    pub async fn publish_message(&self, message: OutboundMessage) -> Result<String, BridgeError> {
        let envelope = self.envelope_from_message(message)?;
        self.publish(&envelope).await
    }

    fn envelope_from_message(&self, message: OutboundMessage) -> Result<EventEnvelope, BridgeError> {
        let OutboundMessage { body, mut metadata } = message;

        let event_type = metadata
            .remove(FIELD_EVENT)
            .map(|v| header_value_string(&v))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| BridgeError::config("message metadata must include 'event'"))?;

        let mut envelope = EventEnvelope::new(event_type);
        envelope.payload = body;
        envelope.aggregate_id = take_string(&mut metadata, FIELD_AGGREGATE_ID);
        envelope.mime_type = take_string(&mut metadata, FIELD_MIME_TYPE);
        envelope.service_name =
            take_string(&mut metadata, FIELD_SERVICE_NAME).or_else(|| self.service_name.clone());
        if let Some(timestamp) = take_string(&mut metadata, FIELD_TIMESTAMP)
            .as_deref()
            .and_then(codec::parse_timestamp)
        {
            envelope.timestamp = timestamp;
        }

        metadata.retain(|key, _| !codec::is_standard_field(key));
        envelope.headers = metadata.into_iter().collect::<Headers>();
        Ok(envelope)
    }
}

fn take_string(metadata: &mut HashMap<String, Value>, key: &str) -> Option<String> {
    metadata
        .remove(key)
        .filter(|v| !v.is_null())
        .map(|v| header_value_string(&v))
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use serde_json::json;

    fn producer(store: &Arc<MemoryStore>) -> StreamProducer {
        StreamProducer::new(store.clone(), "orders").unwrap()
    }

    fn decoded_last(store: &MemoryStore) -> EventEnvelope {
        let entry = store.entries("orders").pop().unwrap();
        codec::decode(&entry.id, &entry.fields).envelope
    }

    #[test]
    fn test_new_requires_stream() {
        let store = Arc::new(MemoryStore::new());
        assert!(matches!(
            StreamProducer::new(store, "  "),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_endpoint_service_name() {
        let store: Arc<dyn StreamStore> = Arc::new(MemoryStore::new());
        let mut endpoint = EndpointConfig::new("orders");

        let producer =
            StreamProducer::from_endpoint(store.clone(), &endpoint, Some("bridge")).unwrap();
        assert_eq!(producer.service_name(), Some("bridge"));

        endpoint.service_name = Some("orders-api".to_string());
        let producer = StreamProducer::from_endpoint(store, &endpoint, Some("bridge")).unwrap();
        assert_eq!(producer.service_name(), Some("orders-api"));
        assert_eq!(producer.stream(), "orders");
    }

    #[tokio::test]
    async fn test_publish_envelope() {
        let store = Arc::new(MemoryStore::new());
        let envelope = EventEnvelope::new("OrderCreated")
            .with_aggregate_id("o-1")
            .with_payload(json!({"total": 42}))
            .with_header("region", "US");

        let id = producer(&store).publish(&envelope).await.unwrap();

        let published = decoded_last(&store);
        assert_eq!(published.entry_id.as_deref(), Some(id.as_str()));
        assert_eq!(published.event_type, "OrderCreated");
        assert_eq!(published.aggregate_id.as_deref(), Some("o-1"));
        assert_eq!(published.payload, Some(Payload::Json(json!({"total": 42}))));
        assert_eq!(published.header_str("region").as_deref(), Some("US"));
    }

    #[tokio::test]
    async fn test_publish_rejects_empty_event_type() {
        let store = Arc::new(MemoryStore::new());
        let err = producer(&store)
            .publish(&EventEnvelope::new(""))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(store.is_empty("orders"));
    }

    #[tokio::test]
    async fn test_publish_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);

        let err = producer(&store)
            .publish(&EventEnvelope::new("A"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Publish {
                source: StoreError::Unavailable(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_produce_stamps_service_name() {
        let store = Arc::new(MemoryStore::new());
        let producer = producer(&store).with_service_name("billing");

        producer
            .produce("InvoiceIssued", Some("inv-7"), "plain body", None)
            .await
            .unwrap();

        let published = decoded_last(&store);
        assert_eq!(published.service_name.as_deref(), Some("billing"));
        assert_eq!(published.aggregate_id.as_deref(), Some("inv-7"));
        assert_eq!(published.payload, Some(Payload::Text("plain body".to_string())));
        assert_eq!(published.mime_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_publish_keeps_envelope_service_name() {
        let store = Arc::new(MemoryStore::new());
        producer(&store)
            .with_service_name("default")
            .publish(&EventEnvelope::new("A").with_service_name("explicit"))
            .await
            .unwrap();

        assert_eq!(
            decoded_last(&store).service_name.as_deref(),
            Some("explicit")
        );
    }

    #[tokio::test]
    async fn test_publish_message_maps_metadata() {
        let store = Arc::new(MemoryStore::new());
        let message = OutboundMessage::new(json!({"sku": "X1"}))
            .with_metadata("event", "OrderCreated")
            .with_metadata("aggregateId", "o-9")
            .with_metadata("timestamp", "2025-01-01T00:00:00Z")
            .with_metadata("region", "US")
            .with_metadata("priority", 5);

        producer(&store)
            .with_service_name("ingest")
            .publish_message(message)
            .await
            .unwrap();

        let published = decoded_last(&store);
        assert_eq!(published.event_type, "OrderCreated");
        assert_eq!(published.aggregate_id.as_deref(), Some("o-9"));
        assert_eq!(published.service_name.as_deref(), Some("ingest"));
        assert_eq!(published.timestamp.to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(published.headers.len(), 2);
        assert_eq!(published.header_str("region").as_deref(), Some("US"));
        assert_eq!(published.header_str("priority").as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_publish_message_requires_event() {
        let store = Arc::new(MemoryStore::new());
        let message = OutboundMessage::new("body").with_metadata("region", "US");

        let err = producer(&store).publish_message(message).await.unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(store.is_empty("orders"));
    }

    #[tokio::test]
    async fn test_publish_message_drops_reserved_names() {
        let store = Arc::new(MemoryStore::new());
        let message = OutboundMessage::new("body")
            .with_metadata("event", "A")
            .with_metadata("payload", "shadow")
            .with_metadata("headers", json!({"region": "US"}))
            .with_metadata("tier", "gold");

        producer(&store).publish_message(message).await.unwrap();

        let published = decoded_last(&store);
        assert_eq!(published.payload, Some(Payload::Text("body".to_string())));
        assert_eq!(published.headers.len(), 1);
        assert_eq!(published.header_str("tier").as_deref(), Some("gold"));
    }
}
