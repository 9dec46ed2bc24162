//! Event handlers.
//!
//! A consumer hands every accepted envelope to one injected [`EventHandler`].
//! Handlers are async and shared across tasks, so they must be `Send + Sync`.
//!
//! ## Built-in Handlers
//!
//! - [`LogHandler`]: structured logging of delivered events
//!
//! ## Writing a Handler
//!
//! ```rust,ignore
//! use streambridge::{DispatchContext, EventEnvelope, EventHandler, HandlerError};
//! use async_trait::async_trait;
//!
//! struct Billing;
//!
//! #[async_trait]
//! impl EventHandler for Billing {
//!     fn name(&self) -> &str {
//!         "billing"
//!     }
//!
//!     async fn handle(&self, event: &EventEnvelope, ctx: &DispatchContext) -> Result<(), HandlerError> {
//!         // charge the customer, then confirm manually when auto-ack is off
//!         ctx.acknowledge().await.map_err(|e| HandlerError::Failed(e.to_string()))
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::envelope::EventEnvelope;
use crate::error::BridgeError;
use crate::store::StreamStore;

/// Errors a handler may return for a single entry.
///
/// The entry stays unacknowledged and the consumer moves on to the next one.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The handler refused the event as invalid
    #[error("event rejected: {0}")]
    Rejected(String),

    /// Generic handler failure
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Correlation data for one dispatch, plus the means to acknowledge it.
#[derive(Clone)]
pub struct DispatchContext {
    pub entry_id: String,
    pub stream_key: String,
    pub group: String,
    store: Arc<dyn StreamStore>,
}

impl DispatchContext {
    pub fn new(
        store: Arc<dyn StreamStore>,
        entry_id: impl Into<String>,
        stream_key: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            stream_key: stream_key.into(),
            group: group.into(),
            store,
        }
    }

    /// Acknowledge this entry for the consumer's group.
    ///
    /// Only needed when auto-ack is off; acknowledging twice is harmless.
    pub async fn acknowledge(&self) -> Result<(), BridgeError> {
        let acked = self
            .store
            .ack(&self.stream_key, &self.group, &self.entry_id)
            .await
            .map_err(|source| BridgeError::Acknowledge {
                entry_id: self.entry_id.clone(),
                source,
            })?;

        debug!(
            entry_id = %self.entry_id,
            stream = %self.stream_key,
            acked,
            "Entry acknowledged by handler"
        );
        Ok(())
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("entry_id", &self.entry_id)
            .field("stream_key", &self.stream_key)
            .field("group", &self.group)
            .field("store", &self.store.name())
            .finish()
    }
}

/// Receives every envelope that passes a consumer's filters.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns a short name for logs (e.g., "log", "billing")
    fn name(&self) -> &str;

    /// Handle one event.
    ///
    /// Returning `Ok` lets the consumer acknowledge the entry when auto-ack is
    /// on. An `Err` leaves it pending in the group.
    async fn handle(&self, event: &EventEnvelope, ctx: &DispatchContext)
        -> Result<(), HandlerError>;
}

/// A handler that logs events using structured logging.
#[derive(Debug, Clone)]
pub struct LogHandler {
    prefix: String,
}

impl LogHandler {
    pub fn new() -> Self {
        Self {
            prefix: "event".to_string(),
        }
    }

    /// Create a LogHandler with a custom prefix (e.g., "audit")
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for LogHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(
        &self,
        event: &EventEnvelope,
        ctx: &DispatchContext,
    ) -> Result<(), HandlerError> {
        let payload = event
            .payload
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default();

        info!(
            prefix = %self.prefix,
            entry_id = %ctx.entry_id,
            stream = %ctx.stream_key,
            group = %ctx.group,
            event_type = %event.event_type,
            aggregate_id = event.aggregate_id.as_deref().unwrap_or_default(),
            service = event.service_name.as_deref().unwrap_or_default(),
            headers = event.headers.len(),
            payload = %payload,
            "[{}] Received: {}/{}",
            self.prefix,
            ctx.stream_key,
            event.event_type
        );

        Ok(())
    }
}
