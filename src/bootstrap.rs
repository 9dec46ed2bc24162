//! Stream and consumer-group bootstrap.
//!
//! Runs once per consumer before its first poll. Safe to run concurrently from
//! several processes: losing the race to create a group is not an error.

use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::store::{StoreError, StreamStore, STREAM_START};

/// Field written to the placeholder entry used to create a stream.
pub const PLACEHOLDER_FIELD: &str = "_bootstrap";

/// What bootstrap actually created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub stream_created: bool,
    pub group_created: bool,
}

/// Make sure `stream` exists and `group` is registered on it.
///
/// A missing stream is created by appending and then deleting a placeholder
/// entry, leaving an empty stream. The group is created at `0-0` so it sees
/// every entry already in the stream.
pub async fn ensure_ready(
    store: &dyn StreamStore,
    stream: &str,
    group: &str,
    auto_create_stream: bool,
    auto_create_group: bool,
) -> Result<BootstrapOutcome, BridgeError> {
    let mut outcome = BootstrapOutcome::default();

    let exists = store
        .exists(stream)
        .await
        .map_err(|source| bootstrap_error(stream, source))?;

    if !exists {
        if !auto_create_stream {
            warn!(stream = %stream, "Stream does not exist and auto-create is disabled");
            return Err(BridgeError::StreamMissing(stream.to_string()));
        }
        create_stream(store, stream).await?;
        outcome.stream_created = true;
    }

    if auto_create_group {
        match store.create_group(stream, group, STREAM_START).await {
            Ok(()) => {
                info!(stream = %stream, group = %group, "Created consumer group");
                outcome.group_created = true;
            }
            Err(StoreError::GroupExists) => {
                debug!(stream = %stream, group = %group, "Consumer group already exists");
            }
            Err(source) => return Err(bootstrap_error(stream, source)),
        }
    }

    Ok(outcome)
}

async fn create_stream(store: &dyn StreamStore, stream: &str) -> Result<(), BridgeError> {
    let placeholder = [(PLACEHOLDER_FIELD.to_string(), "1".to_string())];
    let id = store
        .append(stream, &placeholder)
        .await
        .map_err(|source| bootstrap_error(stream, source))?;

    store
        .delete(stream, &id)
        .await
        .map_err(|source| bootstrap_error(stream, source))?;

    info!(stream = %stream, "Created stream");
    Ok(())
}

fn bootstrap_error(stream: &str, source: StoreError) -> BridgeError {
    BridgeError::Bootstrap {
        stream: stream.to_string(),
        source,
    }
}
