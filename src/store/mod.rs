//! Stream store abstraction.
//!
//! The [`StreamStore`] trait is the narrow set of stream primitives the bridge
//! needs. Consumers, producers and bootstrap only talk to this trait, so the
//! same code runs against Redis ([`RedisStore`]) or the in-process
//! [`MemoryStore`].
//!
//! ## Built-in Stores
//!
//! - [`RedisStore`]: Redis Streams over a shared `deadpool-redis` pool
//! - [`MemoryStore`]: in-process streams with consumer-group semantics

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Read offset meaning "entries never delivered to any group member".
pub const NEW_ENTRIES: &str = ">";

/// Group offset meaning "from the very first entry".
pub const STREAM_START: &str = "0-0";

/// Errors reported by a [`StreamStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No connection could be obtained
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The consumer group being created already exists
    #[error("consumer group already exists")]
    GroupExists,

    /// The store rejected or failed a command
    #[error("command failed: {0}")]
    Command(String),
}

/// One raw stream entry as returned by a group read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Parameters of one consumer-group read.
#[derive(Debug, Clone)]
pub struct GroupRead<'a> {
    pub stream: &'a str,
    pub group: &'a str,
    pub consumer: &'a str,
    /// `>` for new entries, or an id to re-read this consumer's pending entries
    pub start_id: &'a str,
    pub count: usize,
    pub block: Duration,
}

/// Stream primitives used by the bridge.
///
/// Implementations must be safe for concurrent use: one store is shared by
/// every consumer and producer in the process.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Returns a short name for logs (e.g., "redis", "memory")
    fn name(&self) -> &str;

    /// Whether the stream key exists.
    async fn exists(&self, stream: &str) -> Result<bool, StoreError>;

    /// Append an entry and return its store-assigned id.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, StoreError>;

    /// Remove an entry by id; returns the number of entries removed.
    async fn delete(&self, stream: &str, id: &str) -> Result<u64, StoreError>;

    /// Create a consumer group positioned at `start_id`.
    ///
    /// Must return [`StoreError::GroupExists`] when the group is already there.
    async fn create_group(&self, stream: &str, group: &str, start_id: &str)
        -> Result<(), StoreError>;

    /// Read up to `count` entries for a group member, blocking up to `block`.
    ///
    /// An empty result on timeout is normal.
    async fn read_group(&self, read: GroupRead<'_>) -> Result<Vec<StreamEntry>, StoreError>;

    /// Acknowledge an entry; returns the number of entries acknowledged.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<u64, StoreError>;
}
