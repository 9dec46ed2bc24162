//! Consumer-group polling.
//!
//! A [`StreamConsumer`] owns one registration (stream, group, consumer name)
//! and repeats a poll cycle:
//!
//! ```text
//! read batch -> decode -> event type? -> headers? -> handler -> ack
//!                           |              |           |
//!                           +-- ack, skip  +-- ack, skip +-- error: leave pending
//! ```
//!
//! Delivery is at-least-once. An entry whose handler fails stays pending in
//! the group; nothing in the bridge redelivers it.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bootstrap;
use crate::codec;
use crate::config::EndpointConfig;
use crate::error::BridgeError;
use crate::filter::{merge_filters, AllowedEvents, FilterSpec, FilterVerdict, HeaderFilter};
use crate::handler::{DispatchContext, EventHandler};
use crate::identity::resolve_consumer_name;
use crate::shutdown::ShutdownSignal;
use crate::store::{GroupRead, StreamEntry, StreamStore};

/// How often the run loop logs its counters.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    Idle = 0,
    Polling = 1,
    Dispatching = 2,
    Stopped = 3,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Polling,
            2 => Self::Dispatching,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Where a consumer reads from and under which name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRegistration {
    pub stream_key: String,
    pub group: String,
    pub consumer_name: String,
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Entries returned by the read
    pub received: usize,
    /// Entries the handler completed successfully
    pub dispatched: usize,
    /// Entries filtered out (and acknowledged)
    pub skipped: usize,
    /// Entries the handler failed on (left pending)
    pub failed: usize,
}

/// Running counters for one consumer.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    dispatched: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    poll_errors: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub skipped: u64,
    pub failed: u64,
    pub poll_errors: u64,
}

impl ConsumerStats {
    fn record(&self, report: &PollReport) {
        self.dispatched
            .fetch_add(report.dispatched as u64, Ordering::Relaxed);
        self.skipped.fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

enum EntryOutcome {
    Dispatched,
    Skipped,
    Failed,
}

/// Polls one consumer group and dispatches accepted events to a handler.
pub struct StreamConsumer {
    store: Arc<dyn StreamStore>,
    handler: Arc<dyn EventHandler>,
    registration: ConsumerRegistration,
    filters: FilterSpec,
    batch_size: usize,
    block_timeout: Duration,
    poll_interval: Duration,
    auto_ack: bool,
    start_id: String,
    state: AtomicU8,
    stats: ConsumerStats,
}

impl StreamConsumer {
    /// Validate the endpoint, bootstrap the stream and group, and return a
    /// consumer ready to poll.
    ///
    /// `global_filters` are the bridge-wide header filters; the endpoint's own
    /// filters override them key by key.
    pub async fn start(
        store: Arc<dyn StreamStore>,
        handler: Arc<dyn EventHandler>,
        endpoint: &EndpointConfig,
        global_filters: &str,
    ) -> Result<Self, BridgeError> {
        endpoint.validate_for_consumer()?;

        let group = endpoint.group_name().trim().to_string();
        let registration = ConsumerRegistration {
            stream_key: endpoint.stream.clone(),
            consumer_name: resolve_consumer_name(endpoint.consumer_name.as_deref(), &group),
            group,
        };

        let filters = FilterSpec::new(
            AllowedEvents::parse(endpoint.event_list()),
            HeaderFilter::new(global_filters, &endpoint.header_filters),
        );

        bootstrap::ensure_ready(
            store.as_ref(),
            &registration.stream_key,
            &registration.group,
            endpoint.auto_create_stream,
            endpoint.auto_create_group,
        )
        .await?;

        info!(
            stream = %registration.stream_key,
            group = %registration.group,
            consumer = %registration.consumer_name,
            events = ?filters.events.to_sorted_vec(),
            header_filters = %merge_filters(global_filters, &endpoint.header_filters),
            auto_ack = endpoint.auto_ack,
            batch_size = endpoint.batch_size,
            handler = handler.name(),
            store = store.name(),
            "Started stream consumer"
        );

        Ok(Self {
            store,
            handler,
            registration,
            filters,
            batch_size: endpoint.batch_size,
            block_timeout: endpoint.block_timeout(),
            poll_interval: endpoint.poll_interval(),
            auto_ack: endpoint.auto_ack,
            start_id: endpoint.start_id.clone(),
            state: AtomicU8::new(ConsumerState::Idle as u8),
            stats: ConsumerStats::default(),
        })
    }

    pub fn registration(&self) -> &ConsumerRegistration {
        &self.registration
    }

    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Run one poll cycle and return how many entries were dispatched.
    ///
    /// Read failures are logged and reported as a cycle with no progress.
    pub async fn poll(&self) -> usize {
        match self.try_poll().await {
            Ok(report) => report.dispatched,
            Err(e) => {
                self.stats.poll_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    stream = %self.registration.stream_key,
                    group = %self.registration.group,
                    error = %e,
                    "Stream read failed"
                );
                0
            }
        }
    }

    /// Run one poll cycle, surfacing read failures.
    pub async fn try_poll(&self) -> Result<PollReport, BridgeError> {
        if self.state() == ConsumerState::Stopped {
            return Ok(PollReport::default());
        }

        self.set_state(ConsumerState::Polling);
        let read = GroupRead {
            stream: &self.registration.stream_key,
            group: &self.registration.group,
            consumer: &self.registration.consumer_name,
            start_id: &self.start_id,
            count: self.batch_size,
            block: self.block_timeout,
        };

        let entries = match self.store.read_group(read).await {
            Ok(entries) => entries,
            Err(source) => {
                self.set_state(ConsumerState::Idle);
                return Err(BridgeError::Poll {
                    stream: self.registration.stream_key.clone(),
                    source,
                });
            }
        };

        let mut report = PollReport {
            received: entries.len(),
            ..PollReport::default()
        };

        if !entries.is_empty() {
            self.set_state(ConsumerState::Dispatching);
            for entry in entries {
                match self.process(entry).await {
                    EntryOutcome::Dispatched => report.dispatched += 1,
                    EntryOutcome::Skipped => report.skipped += 1,
                    EntryOutcome::Failed => report.failed += 1,
                }
            }

            debug!(
                stream = %self.registration.stream_key,
                received = report.received,
                dispatched = report.dispatched,
                skipped = report.skipped,
                failed = report.failed,
                "Poll cycle complete"
            );
        }

        self.stats.record(&report);
        self.set_state(ConsumerState::Idle);
        Ok(report)
    }

    async fn process(&self, entry: StreamEntry) -> EntryOutcome {
        let decoded = codec::decode(&entry.id, &entry.fields);
        let envelope = decoded.envelope;

        match self.filters.evaluate(&envelope) {
            FilterVerdict::EventTypeNotAllowed => {
                debug!(
                    id = %entry.id,
                    event_type = %envelope.event_type,
                    "Skipping event type not handled by this consumer"
                );
                self.ack_quietly(&entry.id).await;
                EntryOutcome::Skipped
            }
            FilterVerdict::HeaderMismatch => {
                debug!(
                    id = %entry.id,
                    event_type = %envelope.event_type,
                    "Skipping event that does not match header filters"
                );
                self.ack_quietly(&entry.id).await;
                EntryOutcome::Skipped
            }
            FilterVerdict::Accept => {
                let ctx = DispatchContext::new(
                    Arc::clone(&self.store),
                    entry.id.as_str(),
                    self.registration.stream_key.as_str(),
                    self.registration.group.as_str(),
                );

                match self.handler.handle(&envelope, &ctx).await {
                    Ok(()) => {
                        if self.auto_ack {
                            self.ack_quietly(&entry.id).await;
                        }
                        EntryOutcome::Dispatched
                    }
                    Err(e) => {
                        error!(
                            id = %entry.id,
                            stream = %self.registration.stream_key,
                            event_type = %envelope.event_type,
                            handler = self.handler.name(),
                            error = %e,
                            "Handler failed, leaving entry pending"
                        );
                        EntryOutcome::Failed
                    }
                }
            }
        }
    }

    async fn ack_quietly(&self, entry_id: &str) {
        if let Err(e) = self.acknowledge(entry_id).await {
            error!(id = %entry_id, error = %e, "Failed to ACK entry");
        }
    }

    /// Acknowledge an entry for this consumer's group.
    pub async fn acknowledge(&self, entry_id: &str) -> Result<(), BridgeError> {
        self.store
            .ack(
                &self.registration.stream_key,
                &self.registration.group,
                entry_id,
            )
            .await
            .map_err(|source| BridgeError::Acknowledge {
                entry_id: entry_id.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Poll until `shutdown` is triggered, sleeping `poll_interval` between
    /// cycles. A cycle in progress always finishes.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let mut last_stats_log = Instant::now();

        while !shutdown.is_triggered() {
            self.poll().await;

            if last_stats_log.elapsed() >= STATS_LOG_INTERVAL {
                self.log_stats("Consumer statistics");
                last_stats_log = Instant::now();
            }

            tokio::select! {
                _ = shutdown.triggered() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.set_state(ConsumerState::Stopped);
        self.log_stats("Stream consumer stopped");
    }

    fn log_stats(&self, message: &str) {
        let stats = self.stats.snapshot();
        info!(
            stream = %self.registration.stream_key,
            group = %self.registration.group,
            consumer = %self.registration.consumer_name,
            dispatched = stats.dispatched,
            skipped = stats.skipped,
            failed = stats.failed,
            poll_errors = stats.poll_errors,
            "{}",
            message
        );
    }

    /// Run on a dedicated task with its own shutdown signal.
    pub fn spawn(self) -> ConsumerHandle {
        self.spawn_with(ShutdownSignal::new())
    }

    /// Run on a dedicated task, stopping when `shutdown` is triggered.
    pub fn spawn_with(self, shutdown: ShutdownSignal) -> ConsumerHandle {
        let consumer = Arc::new(self);
        let task = {
            let consumer = Arc::clone(&consumer);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(shutdown).await })
        };

        ConsumerHandle {
            consumer,
            shutdown,
            task,
        }
    }
}

/// A consumer running on its own task.
pub struct ConsumerHandle {
    consumer: Arc<StreamConsumer>,
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    /// Ask the loop to stop after its current cycle and wait for it.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.join().await;
    }

    /// Wait for the loop to exit without requesting it.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(
                stream = %self.consumer.registration.stream_key,
                error = %e,
                "Consumer task ended abnormally"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventEnvelope;
    use crate::handler::HandlerError;
    use crate::producer::StreamProducer;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventEnvelope>>,
        fail_aggregate: Option<String>,
        manual_ack: bool,
    }

    impl Recorder {
        fn failing_on(aggregate_id: &str) -> Self {
            Self {
                fail_aggregate: Some(aggregate_id.to_string()),
                ..Self::default()
            }
        }

        fn acking() -> Self {
            Self {
                manual_ack: true,
                ..Self::default()
            }
        }

        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn aggregate_ids(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| e.aggregate_id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle(
            &self,
            event: &EventEnvelope,
            ctx: &DispatchContext,
        ) -> Result<(), HandlerError> {
            if event.aggregate_id.is_some() && event.aggregate_id == self.fail_aggregate {
                return Err(HandlerError::Failed("refused".to_string()));
            }
            self.seen.lock().unwrap().push(event.clone());
            if self.manual_ack {
                ctx.acknowledge()
                    .await
                    .map_err(|e| HandlerError::Failed(e.to_string()))?;
            }
            Ok(())
        }
    }

    fn endpoint(events: &str) -> EndpointConfig {
        let mut endpoint =
            EndpointConfig::consumer("orders", "billing", events).with_consumer_name("billing-1");
        endpoint.block_timeout_ms = 0;
        endpoint.poll_interval_ms = 5;
        endpoint
    }

    async fn publish(store: &Arc<MemoryStore>, envelope: EventEnvelope) -> String {
        let producer = StreamProducer::new(store.clone(), "orders").unwrap();
        producer.publish(&envelope).await.unwrap()
    }

    // Lifecycle tests

    #[tokio::test]
    async fn test_start_requires_group_and_events() {
        let store = Arc::new(MemoryStore::new());
        let handler = Arc::new(Recorder::default());

        let mut no_group = endpoint("A");
        no_group.group = None;
        let err = StreamConsumer::start(store.clone(), handler.clone(), &no_group, "")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::Configuration(_)));

        let no_events = endpoint(" , ");
        assert!(StreamConsumer::start(store.clone(), handler, &no_events, "")
            .await
            .is_err());
        assert!(!store.exists("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_start_missing_stream_without_auto_create() {
        let store = Arc::new(MemoryStore::new());
        let mut config = endpoint("A");
        config.auto_create_stream = false;

        let err = StreamConsumer::start(store, Arc::new(Recorder::default()), &config, "")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::StreamMissing(_)));
    }

    #[tokio::test]
    async fn test_start_bootstraps_and_generates_name() {
        let store = Arc::new(MemoryStore::new());
        let mut config = endpoint("A");
        config.consumer_name = None;
        let _guard = crate::identity::process_names_lock();

        let consumer = StreamConsumer::start(store.clone(), Arc::new(Recorder::default()), &config, "")
            .await
            .unwrap();

        assert!(store.has_group("orders", "billing"));
        assert!(consumer.registration().consumer_name.starts_with("billing-"));
        assert_eq!(consumer.state(), ConsumerState::Idle);
    }

    // Filtering tests

    #[tokio::test]
    async fn test_event_type_filter_drains_stream() {
        let store = Arc::new(MemoryStore::new());
        for (event, id) in [("A", "1"), ("B", "2"), ("A", "3"), ("B", "4")] {
            publish(&store, EventEnvelope::new(event).with_aggregate_id(id)).await;
        }

        let handler = Arc::new(Recorder::default());
        let consumer = StreamConsumer::start(store.clone(), handler.clone(), &endpoint("A"), "")
            .await
            .unwrap();

        let report = consumer.try_poll().await.unwrap();
        assert_eq!(
            report,
            PollReport {
                received: 4,
                dispatched: 2,
                skipped: 2,
                failed: 0
            }
        );
        assert_eq!(handler.aggregate_ids(), vec!["1", "3"]);
        assert!(store.pending_ids("orders", "billing").is_empty());

        // Skipped entries are acknowledged, so nothing comes back
        assert_eq!(consumer.poll().await, 0);
    }

    #[tokio::test]
    async fn test_header_filters_merge_global_and_route() {
        let store = Arc::new(MemoryStore::new());
        publish(
            &store,
            EventEnvelope::new("A")
                .with_aggregate_id("us")
                .with_header("environment", "production")
                .with_header("region", "US"),
        )
        .await;
        publish(
            &store,
            EventEnvelope::new("A")
                .with_aggregate_id("eu")
                .with_header("environment", "production")
                .with_header("region", "EU"),
        )
        .await;
        publish(
            &store,
            EventEnvelope::new("A")
                .with_aggregate_id("staging")
                .with_header("environment", "staging")
                .with_header("region", "US"),
        )
        .await;
        publish(&store, EventEnvelope::new("A").with_aggregate_id("bare")).await;

        let handler = Arc::new(Recorder::default());
        let config = endpoint("A").with_header_filters("region=US");
        let consumer = StreamConsumer::start(
            store.clone(),
            handler.clone(),
            &config,
            "environment=production,region=EU",
        )
        .await
        .unwrap();

        let report = consumer.try_poll().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(handler.aggregate_ids(), vec!["us"]);
    }

    // Acknowledgement tests

    #[tokio::test]
    async fn test_handler_failure_is_contained() {
        let store = Arc::new(MemoryStore::new());
        publish(&store, EventEnvelope::new("A").with_aggregate_id("1")).await;
        let bad = publish(&store, EventEnvelope::new("A").with_aggregate_id("bad")).await;
        publish(&store, EventEnvelope::new("A").with_aggregate_id("3")).await;

        let handler = Arc::new(Recorder::failing_on("bad"));
        let consumer = StreamConsumer::start(store.clone(), handler.clone(), &endpoint("A"), "")
            .await
            .unwrap();

        let report = consumer.try_poll().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(handler.aggregate_ids(), vec!["1", "3"]);
        assert_eq!(store.pending_ids("orders", "billing"), vec![bad]);
        assert_eq!(consumer.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_auto_ack_disabled_leaves_entries_pending() {
        let store = Arc::new(MemoryStore::new());
        let first = publish(&store, EventEnvelope::new("A")).await;
        let second = publish(&store, EventEnvelope::new("A")).await;

        let consumer = StreamConsumer::start(
            store.clone(),
            Arc::new(Recorder::default()),
            &endpoint("A").with_auto_ack(false),
            "",
        )
        .await
        .unwrap();

        assert_eq!(consumer.poll().await, 2);
        assert_eq!(
            store.pending_ids("orders", "billing"),
            vec![first.clone(), second.clone()]
        );

        consumer.acknowledge(&first).await.unwrap();
        assert_eq!(store.pending_ids("orders", "billing"), vec![second]);
    }

    #[tokio::test]
    async fn test_handler_driven_acknowledgement() {
        let store = Arc::new(MemoryStore::new());
        publish(&store, EventEnvelope::new("A")).await;

        let consumer = StreamConsumer::start(
            store.clone(),
            Arc::new(Recorder::acking()),
            &endpoint("A").with_auto_ack(false),
            "",
        )
        .await
        .unwrap();

        assert_eq!(consumer.poll().await, 1);
        assert!(store.pending_ids("orders", "billing").is_empty());
    }

    #[tokio::test]
    async fn test_degraded_entry_is_still_dispatched() {
        let store = Arc::new(MemoryStore::new());
        store
            .append(
                "orders",
                &[
                    ("event".to_string(), "A".to_string()),
                    ("timestamp".to_string(), "not-a-time".to_string()),
                    ("headers".to_string(), "[1,2]".to_string()),
                ],
            )
            .await
            .unwrap();

        let handler = Arc::new(Recorder::default());
        let consumer = StreamConsumer::start(store.clone(), handler.clone(), &endpoint("A"), "")
            .await
            .unwrap();

        assert_eq!(consumer.poll().await, 1);
        assert_eq!(handler.count(), 1);
    }

    // Error handling tests

    #[tokio::test]
    async fn test_read_failure_is_zero_progress() {
        let store = Arc::new(MemoryStore::new());
        let consumer =
            StreamConsumer::start(store.clone(), Arc::new(Recorder::default()), &endpoint("A"), "")
                .await
                .unwrap();

        store.set_offline(true);
        assert!(matches!(
            consumer.try_poll().await,
            Err(BridgeError::Poll { .. })
        ));
        assert_eq!(consumer.poll().await, 0);
        assert_eq!(consumer.stats().poll_errors, 1);
        assert_eq!(consumer.state(), ConsumerState::Idle);

        store.set_offline(false);
        publish(&store, EventEnvelope::new("A")).await;
        assert_eq!(consumer.poll().await, 1);
    }

    // Run loop tests

    #[tokio::test]
    async fn test_spawned_consumer_stops() {
        let store = Arc::new(MemoryStore::new());
        let handler = Arc::new(Recorder::default());
        let consumer = StreamConsumer::start(store.clone(), handler.clone(), &endpoint("A"), "")
            .await
            .unwrap();
        let handle = consumer.spawn();

        publish(&store, EventEnvelope::new("A")).await;
        for _ in 0..200 {
            if handler.count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handler.count(), 1);
        assert_eq!(handle.consumer().stats().dispatched, 1);

        let consumer = Arc::clone(&handle.consumer);
        handle.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(consumer.try_poll().await.unwrap(), PollReport::default());
    }

    #[tokio::test]
    async fn test_run_exits_when_already_shut_down() {
        let store = Arc::new(MemoryStore::new());
        let consumer =
            StreamConsumer::start(store, Arc::new(Recorder::default()), &endpoint("A"), "")
                .await
                .unwrap();

        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), consumer.run(shutdown))
            .await
            .unwrap();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    // End-to-end

    #[tokio::test]
    async fn test_two_groups_split_by_region() {
        let store = Arc::new(MemoryStore::new());
        let us_handler = Arc::new(Recorder::default());
        let eu_handler = Arc::new(Recorder::default());

        let mut us_config = endpoint("OrderCreated").with_header_filters("region=US");
        us_config.group = Some("us-billing".to_string());
        us_config.consumer_name = None;
        let mut eu_config = endpoint("OrderCreated").with_header_filters("region=EU");
        eu_config.group = Some("eu-billing".to_string());
        eu_config.consumer_name = None;
        let _guard = crate::identity::process_names_lock();

        let us = StreamConsumer::start(store.clone(), us_handler.clone(), &us_config, "")
            .await
            .unwrap();
        let eu = StreamConsumer::start(store.clone(), eu_handler.clone(), &eu_config, "")
            .await
            .unwrap();
        assert_ne!(
            us.registration().consumer_name,
            eu.registration().consumer_name
        );

        let producer = StreamProducer::new(store.clone(), "orders").unwrap();
        producer
            .publish(
                &EventEnvelope::new("OrderCreated")
                    .with_aggregate_id("order-us")
                    .with_header("region", "US"),
            )
            .await
            .unwrap();
        producer
            .publish(
                &EventEnvelope::new("OrderCreated")
                    .with_aggregate_id("order-eu")
                    .with_header("region", "EU"),
            )
            .await
            .unwrap();

        assert_eq!(us.poll().await, 1);
        assert_eq!(eu.poll().await, 1);
        assert_eq!(us_handler.aggregate_ids(), vec!["order-us"]);
        assert_eq!(eu_handler.aggregate_ids(), vec!["order-eu"]);
        assert!(store.pending_ids("orders", "us-billing").is_empty());
        assert!(store.pending_ids("orders", "eu-billing").is_empty());
    }
}
