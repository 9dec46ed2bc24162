//! # Stream Bridge
//!
//! Moves application events in and out of Redis Streams.
//!
//! ## Architecture
//!
//! ```text
//! Producer -> encode -> XADD -> Stream -> XREADGROUP -> decode -> filters -> Handler -> XACK
//! ```
//!
//! ## Modules
//!
//! - [`envelope`]: The event envelope carried through the bridge
//! - [`codec`]: Envelope <-> stream entry field mapping
//! - [`filter`]: Event-type and header filters
//! - [`consumer`]: Consumer-group polling and dispatch
//! - [`producer`]: Publishing to a stream
//! - [`store`]: Stream store trait with Redis and in-memory implementations
//! - [`config`]: TOML configuration and endpoint URIs

pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod handler;
pub mod identity;
pub mod producer;
pub mod shutdown;
pub mod store;

use tracing_subscriber::EnvFilter;

// Re-export commonly used types at crate root
pub use config::{BridgeConfig, EndpointConfig};
pub use connection::RedisConnector;
pub use consumer::{ConsumerHandle, ConsumerState, PollReport, StreamConsumer};
pub use envelope::{EventEnvelope, Payload};
pub use error::BridgeError;
pub use handler::{DispatchContext, EventHandler, HandlerError, LogHandler};
pub use producer::{OutboundMessage, StreamProducer};
pub use store::{MemoryStore, RedisStore, StreamStore};

/// Initialize `tracing` output, honouring `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed (e.g., by an embedding application)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
