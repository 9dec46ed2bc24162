//! In-process stream store.
//!
//! [`MemoryStore`] keeps streams in memory and implements the consumer-group
//! rules the bridge relies on: every entry is delivered to one group member,
//! stays pending until acknowledged, and a group created at `0-0` sees the
//! whole stream. Used for tests and for embedding the bridge without Redis.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use super::{GroupRead, StoreError, StreamEntry, StreamStore, NEW_ENTRIES};

/// How often a blocked read re-checks for new entries.
const BLOCK_POLL_STEP: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct StoredEntry {
    ordinal: u64,
    id: String,
    fields: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Group {
    /// Ordinal of the last entry handed out with `>`
    last_delivered: u64,
    /// ordinal -> consumer that holds the entry
    pending: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: Vec<StoredEntry>,
    groups: HashMap<String, Group>,
    next_ordinal: u64,
    last_ms: i64,
    last_seq: u64,
}

impl StreamLog {
    fn next_id(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        if now > self.last_ms {
            self.last_ms = now;
            self.last_seq = 0;
        } else {
            self.last_seq += 1;
        }
        format!("{}-{}", self.last_ms, self.last_seq)
    }

    fn entry(&self, ordinal: u64) -> Option<&StoredEntry> {
        self.entries.iter().find(|e| e.ordinal == ordinal)
    }

    fn ordinal_of(&self, id: &str) -> Option<u64> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.ordinal)
    }
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<String, StreamLog>,
    offline: bool,
}

/// In-memory [`StreamStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection: while offline every
    /// operation fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Number of live entries in a stream (0 if it does not exist).
    pub fn len(&self, stream: &str) -> usize {
        self.lock()
            .streams
            .get(stream)
            .map(|log| log.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// Snapshot of a stream's entries, oldest first.
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.lock()
            .streams
            .get(stream)
            .map(|log| {
                log.entries
                    .iter()
                    .map(|e| StreamEntry::new(e.id.clone(), e.fields.iter().cloned().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids pending (delivered but unacknowledged) in a group, oldest first.
    pub fn pending_ids(&self, stream: &str, group: &str) -> Vec<String> {
        let inner = self.lock();
        let Some(log) = inner.streams.get(stream) else {
            return Vec::new();
        };
        let Some(group) = log.groups.get(group) else {
            return Vec::new();
        };
        group
            .pending
            .keys()
            .filter_map(|ordinal| log.entry(*ordinal).map(|e| e.id.clone()))
            .collect()
    }

    pub fn has_group(&self, stream: &str, group: &str) -> bool {
        self.lock()
            .streams
            .get(stream)
            .map(|log| log.groups.contains_key(group))
            .unwrap_or(false)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn online(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let inner = self.lock();
        if inner.offline {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(inner)
    }

    fn try_read(&self, read: &GroupRead<'_>) -> Result<Vec<StreamEntry>, StoreError> {
        let mut inner = self.online()?;
        let log = inner
            .streams
            .get_mut(read.stream)
            .ok_or_else(|| no_group(read.stream, read.group))?;

        let StreamLog {
            entries, groups, ..
        } = log;
        let group = groups
            .get_mut(read.group)
            .ok_or_else(|| no_group(read.stream, read.group))?;

        let mut batch = Vec::new();
        if read.start_id == NEW_ENTRIES {
            let from = group.last_delivered;
            for entry in entries.iter().filter(|e| e.ordinal > from) {
                if batch.len() >= read.count {
                    break;
                }
                group.last_delivered = entry.ordinal;
                group.pending.insert(entry.ordinal, read.consumer.to_string());
                batch.push(StreamEntry::new(
                    entry.id.clone(),
                    entry.fields.iter().cloned().collect(),
                ));
            }
        } else {
            // Re-read this consumer's pending entries
            for (ordinal, owner) in &group.pending {
                if batch.len() >= read.count {
                    break;
                }
                if owner != read.consumer {
                    continue;
                }
                if let Some(entry) = entries.iter().find(|e| e.ordinal == *ordinal) {
                    batch.push(StreamEntry::new(
                        entry.id.clone(),
                        entry.fields.iter().cloned().collect(),
                    ));
                }
            }
        }

        Ok(batch)
    }
}

fn no_group(stream: &str, group: &str) -> StoreError {
    StoreError::Command(format!(
        "NOGROUP No such key '{}' or consumer group '{}'",
        stream, group
    ))
}

#[async_trait]
impl StreamStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn exists(&self, stream: &str) -> Result<bool, StoreError> {
        Ok(self.online()?.streams.contains_key(stream))
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, StoreError> {
        if fields.is_empty() {
            return Err(StoreError::Command(
                "ERR wrong number of arguments for 'xadd' command".to_string(),
            ));
        }

        let mut inner = self.online()?;
        let log = inner.streams.entry(stream.to_string()).or_default();
        let id = log.next_id();
        log.next_ordinal += 1;
        let ordinal = log.next_ordinal;
        log.entries.push(StoredEntry {
            ordinal,
            id: id.clone(),
            fields: fields.to_vec(),
        });
        Ok(id)
    }

    async fn delete(&self, stream: &str, id: &str) -> Result<u64, StoreError> {
        let mut inner = self.online()?;
        let Some(log) = inner.streams.get_mut(stream) else {
            return Ok(0);
        };
        let before = log.entries.len();
        log.entries.retain(|e| e.id != id);
        Ok((before - log.entries.len()) as u64)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.online()?;
        let log = inner.streams.get_mut(stream).ok_or_else(|| {
            StoreError::Command(
                "ERR The XGROUP subcommand requires the key to exist".to_string(),
            )
        })?;

        if log.groups.contains_key(group) {
            return Err(StoreError::GroupExists);
        }

        let last_delivered = match start_id {
            "0" | "0-0" => 0,
            "$" => log.next_ordinal,
            id => log.ordinal_of(id).ok_or_else(|| {
                StoreError::Command(format!("ERR unknown start id '{}'", id))
            })?,
        };

        log.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn read_group(&self, read: GroupRead<'_>) -> Result<Vec<StreamEntry>, StoreError> {
        let deadline = Instant::now() + read.block;
        loop {
            let batch = self.try_read(&read)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(BLOCK_POLL_STEP.min(remaining)).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<u64, StoreError> {
        let mut inner = self.online()?;
        let log = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| no_group(stream, group))?;
        let ordinal = log.ordinal_of(id);
        let group_state = log
            .groups
            .get_mut(group)
            .ok_or_else(|| no_group(stream, group))?;

        let removed = ordinal
            .and_then(|ordinal| group_state.pending.remove(&ordinal))
            .is_some();
        Ok(u64::from(removed))
    }
}
