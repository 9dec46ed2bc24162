//! Redis Streams implementation of [`StreamStore`].
//!
//! Every call checks a connection out of the shared `deadpool-redis` pool, so
//! one [`RedisStore`] (or clones of it) can serve all consumers and producers
//! of the process concurrently.

use async_trait::async_trait;
use deadpool_redis::redis::streams::{StreamReadOptions, StreamReadReply};
use deadpool_redis::redis::{cmd, AsyncCommands, RedisError, Value as RedisValue};
use deadpool_redis::{Connection, Pool};
use std::collections::HashMap;
use tracing::{debug, error};

use super::{GroupRead, StoreError, StreamEntry, StreamStore};

/// [`StreamStore`] backed by a Redis connection pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Round-trip a PING to check connectivity.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool.get().await.map_err(|e| {
            error!(error = %e, "Failed to get Redis connection");
            StoreError::Unavailable(e.to_string())
        })
    }
}

/// Connection-level failures are `Unavailable`; everything else is a command error.
fn map_redis_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

/// Extract a field value from Redis stream data as a string.
fn field_to_string(value: &RedisValue) -> Option<String> {
    match value {
        RedisValue::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        RedisValue::SimpleString(s) => Some(s.clone()),
        RedisValue::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn to_string_map(map: &HashMap<String, RedisValue>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(key, value)| match field_to_string(value) {
            Some(s) => Some((key.clone(), s)),
            None => {
                debug!(field = %key, "Skipping stream field with non-string value");
                None
            }
        })
        .collect()
}

#[async_trait]
impl StreamStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn exists(&self, stream: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let count: u64 = cmd("EXISTS")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(count == 1)
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, StoreError> {
        let mut conn = self.connection().await?;

        // XADD key * field value [field value ...]
        let mut command = cmd("XADD");
        command.arg(stream).arg("*");
        for (name, value) in fields {
            command.arg(name).arg(value);
        }

        let id: String = command
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(id)
    }

    async fn delete(&self, stream: &str, id: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let removed: u64 = cmd("XDEL")
            .arg(stream)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(removed)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: Result<(), RedisError> = cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Err(StoreError::GroupExists),
            Err(e) => Err(map_redis_error(e)),
        }
    }

    async fn read_group(&self, read: GroupRead<'_>) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.connection().await?;

        let mut opts = StreamReadOptions::default()
            .group(read.group, read.consumer)
            .count(read.count);
        // BLOCK 0 waits forever; a zero timeout means "don't block" here
        if !read.block.is_zero() {
            opts = opts.block(read.block.as_millis() as usize);
        }

        // Nil on timeout
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[read.stream], &[read.start_id], &opts)
            .await
            .map_err(map_redis_error)?;

        let entries = reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(|element| StreamEntry::new(element.id, to_string_map(&element.map)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let acked: u64 = conn
            .xack(stream, group, &[id])
            .await
            .map_err(map_redis_error)?;
        Ok(acked)
    }
}
