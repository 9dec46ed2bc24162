//! Error types for the stream bridge.
//!
//! Setup failures (configuration, connection, bootstrap) are loud and abort
//! startup. Per-message failures never show up here: decode problems are
//! reported as [`crate::codec::DecodeIssue`] values and handler failures as
//! [`crate::handler::HandlerError`], both contained to a single entry.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by consumers, producers and bootstrap.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Required configuration is missing or malformed
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The store handle could not be created or checked out
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// The stream is absent and auto-creation is disabled
    #[error("stream '{0}' does not exist and auto-create is disabled")]
    StreamMissing(String),

    /// Stream or group creation failed for a reason other than "already exists"
    #[error("bootstrap failed for stream '{stream}': {source}")]
    Bootstrap {
        stream: String,
        #[source]
        source: StoreError,
    },

    /// Appending to the stream failed
    #[error("failed to publish to stream '{stream}': {source}")]
    Publish {
        stream: String,
        #[source]
        source: StoreError,
    },

    /// Reading from the consumer group failed
    #[error("failed to read stream '{stream}': {source}")]
    Poll {
        stream: String,
        #[source]
        source: StoreError,
    },

    /// Acknowledging an entry failed
    #[error("failed to acknowledge entry '{entry_id}': {source}")]
    Acknowledge {
        entry_id: String,
        #[source]
        source: StoreError,
    },
}

impl BridgeError {
    /// Shorthand for a [`BridgeError::Configuration`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
