//! Event consumers: classification events in, `FraudEvent` vertices out.
//!
//! One worker per partition, one message at a time. A checkpoint is written
//! only after the vertex write succeeds, and a worker never moves past a
//! message whose write failed on connectivity.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::channel::{Delivery, EventChannel};
use super::event::ClassificationEvent;
use crate::config::Config;
use crate::error::{FraudGraphError, Result};
use crate::graph::{GraphStore, Vertex};

/// Consecutive connectivity failures tolerated by a drain before it gives up.
const MAX_DRAIN_RETRIES: u32 = 3;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// What became of one delivered message.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Vertex written; checkpoint advanced (or attempted)
    Committed { event_id: String },
    /// Unusable message, skipped without a checkpoint
    Dropped { reason: String },
    /// Store unreachable; redeliver from the last checkpoint
    Retry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionSummary {
    pub partition: u32,
    pub committed: u64,
    pub dropped: u64,
    pub retries: u64,
    pub checkpoint: Option<i64>,
}

pub struct IngestPipeline {
    store: Arc<dyn GraphStore>,
    channel: Arc<dyn EventChannel>,
    consumer_group: String,
    poll_interval: Duration,
    retry_backoff: Duration,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        channel: Arc<dyn EventChannel>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            store,
            channel,
            consumer_group: consumer_group.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn GraphStore>, channel: Arc<dyn EventChannel>) -> Self {
        Self::new(store, channel, config.ingest.consumer_group.clone())
            .with_timing(config.poll_interval(), config.retry_backoff())
    }

    pub fn with_timing(mut self, poll_interval: Duration, retry_backoff: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.retry_backoff = retry_backoff;
        self
    }

    /// Parse, validate and upsert one message, committing the checkpoint on success.
    ///
    /// Only a configuration failure is returned as an error; everything else
    /// is folded into the [`Disposition`].
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<Disposition> {
        let event = match ClassificationEvent::parse(&delivery.payload).and_then(|e| e.into_fraud_event()) {
            Ok(event) => event,
            Err(err) => {
                log::warn!(
                    "Dropping message {}/{}: {}",
                    delivery.partition,
                    delivery.sequence_number,
                    err
                );
                return Ok(Disposition::Dropped { reason: err.to_string() });
            }
        };

        let event_id = event.event_id.clone();
        match self.store.upsert_vertex(Vertex::FraudEvent(event)).await {
            Ok(_) => {
                log::info!(
                    "Stored FraudEvent {} from partition {} seq {}",
                    event_id,
                    delivery.partition,
                    delivery.sequence_number
                );
                self.commit(delivery).await;
                Ok(Disposition::Committed { event_id })
            }
            Err(err @ FraudGraphError::Connectivity(_)) => {
                log::error!(
                    "Graph unreachable writing {} (partition {} seq {}): {}",
                    event_id,
                    delivery.partition,
                    delivery.sequence_number,
                    err
                );
                Ok(Disposition::Retry)
            }
            Err(err @ FraudGraphError::Configuration(_)) => Err(err),
            Err(err @ (FraudGraphError::Validation(_) | FraudGraphError::Parse(_))) => {
                log::warn!("Dropping {}: {}", event_id, err);
                Ok(Disposition::Dropped { reason: err.to_string() })
            }
            Err(err) => {
                log::error!(
                    "Dropping {} after failed write (group {}, partition {}, seq {}): {}",
                    event_id,
                    self.consumer_group,
                    delivery.partition,
                    delivery.sequence_number,
                    err
                );
                Ok(Disposition::Dropped { reason: err.to_string() })
            }
        }
    }

    async fn commit(&self, delivery: &Delivery) {
        if let Err(err) = self
            .channel
            .checkpoint(&self.consumer_group, delivery.partition, delivery.sequence_number)
            .await
        {
            log::error!(
                "Checkpoint for partition {} seq {} not saved, message will be redelivered: {}",
                delivery.partition,
                delivery.sequence_number,
                err
            );
        }
    }

    /// Process everything currently in every partition, then return.
    pub async fn drain(&self) -> Result<Vec<PartitionSummary>> {
        let mut summaries = Vec::new();
        for partition in 0..self.channel.partitions() {
            summaries.push(self.consume(partition, None).await?);
        }
        Ok(summaries)
    }

    pub async fn drain_partition(&self, partition: u32) -> Result<PartitionSummary> {
        self.consume(partition, None).await
    }

    /// Consume one partition until `shutdown` flips to true (or its sender is dropped).
    pub async fn run_partition(&self, partition: u32, shutdown: watch::Receiver<bool>) -> Result<PartitionSummary> {
        self.consume(partition, Some(shutdown)).await
    }

    /// One concurrent worker per partition until shutdown.
    ///
    /// The first worker that fails or panics stops its siblings, and `run`
    /// returns that failure once every worker has exited.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<Vec<PartitionSummary>> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        for partition in 0..self.channel.partitions() {
            let pipeline = Arc::clone(&self);
            let stop = stop_rx.clone();
            workers.spawn(async move { pipeline.run_partition(partition, stop).await });
        }
        drop(stop_rx);
        log::info!(
            "Started {} ingestion workers for group {}",
            self.channel.partitions(),
            self.consumer_group
        );

        let mut shutdown = Some(shutdown);
        let mut summaries = Vec::new();
        let mut first_error = None;
        loop {
            tokio::select! {
                joined = workers.join_next() => {
                    let Some(joined) = joined else { break };
                    let failure = match joined {
                        Ok(Ok(summary)) => {
                            summaries.push(summary);
                            continue;
                        }
                        Ok(Err(err)) => err,
                        Err(err) => FraudGraphError::Query(format!("ingestion worker panicked: {}", err)),
                    };
                    log::error!("Ingestion worker stopped, stopping the others: {}", failure);
                    first_error.get_or_insert(failure);
                    let _ = stop_tx.send(true);
                }
                _ = shutdown_requested(&mut shutdown) => {
                    let _ = stop_tx.send(true);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                summaries.sort_by_key(|s| s.partition);
                Ok(summaries)
            }
        }
    }

    async fn consume(&self, partition: u32, mut shutdown: Option<watch::Receiver<bool>>) -> Result<PartitionSummary> {
        let draining = shutdown.is_none();
        let mut checkpoint = self.channel.load_checkpoint(&self.consumer_group, partition).await?;
        let mut cursor = checkpoint.unwrap_or(0);
        let mut consecutive_retries = 0;
        let mut summary = PartitionSummary {
            partition,
            checkpoint,
            ..Default::default()
        };

        log::debug!("Partition {} starting after seq {}", partition, cursor);

        while !stopping(&shutdown) {
            let wait = if draining { Duration::ZERO } else { self.poll_interval };
            let delivery = match self.channel.receive(partition, cursor, wait).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) if draining => break,
                Ok(None) => continue,
                Err(err) if err.is_retryable() => {
                    log::error!("Receive on partition {} failed: {}", partition, err);
                    consecutive_retries += 1;
                    if draining && consecutive_retries > MAX_DRAIN_RETRIES {
                        return Err(err);
                    }
                    self.back_off(&mut shutdown).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            match self.handle_delivery(&delivery).await? {
                Disposition::Committed { .. } => {
                    consecutive_retries = 0;
                    summary.committed += 1;
                    cursor = delivery.sequence_number;
                    checkpoint = Some(delivery.sequence_number);
                }
                Disposition::Dropped { .. } => {
                    consecutive_retries = 0;
                    summary.dropped += 1;
                    cursor = delivery.sequence_number;
                }
                Disposition::Retry => {
                    summary.retries += 1;
                    consecutive_retries += 1;
                    if draining && consecutive_retries > MAX_DRAIN_RETRIES {
                        return Err(FraudGraphError::Connectivity(format!(
                            "partition {} stuck at seq {} after {} attempts",
                            partition, delivery.sequence_number, consecutive_retries
                        )));
                    }
                    self.back_off(&mut shutdown).await;
                    cursor = checkpoint.unwrap_or(0);
                }
            }
        }

        summary.checkpoint = checkpoint;
        log::info!(
            "Partition {}: {} committed, {} dropped, {} retries",
            partition,
            summary.committed,
            summary.dropped,
            summary.retries
        );
        Ok(summary)
    }

    async fn back_off(&self, shutdown: &mut Option<watch::Receiver<bool>>) {
        match shutdown {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_backoff) => {}
                    _ = rx.changed() => {}
                }
            }
            None => tokio::time::sleep(self.retry_backoff).await,
        }
    }
}

/// Resolves once shutdown is requested or its sender is gone, then never again.
async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown.as_mut() else {
        return std::future::pending().await;
    };
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            break;
        }
    }
    *shutdown = None;
}

fn stopping(shutdown: &Option<watch::Receiver<bool>>) -> bool {
    match shutdown {
        Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Direction, Label, MemoryGraphStore, PropertyValue, Relation, VertexKey};
    use crate::ingest::channel::MemoryEventChannel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Copy)]
    enum Fault {
        Connectivity,
        Configuration,
        Panic,
    }

    /// Store whose first `failures` upserts fail with `fault`.
    struct FlakyStore {
        inner: MemoryGraphStore,
        fault: Fault,
        failures: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self::failing_with(Fault::Connectivity, failures)
        }

        fn failing_with(fault: Fault, failures: u32) -> Self {
            Self {
                inner: MemoryGraphStore::new(),
                fault,
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn upsert_vertex(&self, vertex: Vertex) -> Result<Vertex> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return match self.fault {
                    Fault::Connectivity => Err(FraudGraphError::Connectivity("database is locked".to_string())),
                    Fault::Configuration => Err(FraudGraphError::Configuration("graph is read-only".to_string())),
                    Fault::Panic => panic!("vertex writer crashed"),
                };
            }
            self.inner.upsert_vertex(vertex).await
        }

        async fn add_edge(&self, from: &VertexKey, to: &VertexKey, relation: Relation) -> Result<bool> {
            self.inner.add_edge(from, to, relation).await
        }

        async fn find_vertex(&self, label: Label, property: &str, value: &PropertyValue) -> Result<Option<Vertex>> {
            self.inner.find_vertex(label, property, value).await
        }

        async fn neighbors(&self, vertex: &VertexKey, relation: Relation, direction: Direction) -> Result<Vec<Vertex>> {
            self.inner.neighbors(vertex, relation, direction).await
        }

        async fn vertices_with_degree_at_least(
            &self,
            label: Label,
            relation: Relation,
            direction: Direction,
            threshold: usize,
        ) -> Result<Vec<Vertex>> {
            self.inner
                .vertices_with_degree_at_least(label, relation, direction, threshold)
                .await
        }

        async fn drop_all(&self) -> Result<()> {
            self.inner.drop_all().await
        }

        async fn count_vertices(&self, label: Option<Label>) -> Result<u64> {
            self.inner.count_vertices(label).await
        }

        async fn count_edges(&self, relation: Option<Relation>) -> Result<u64> {
            self.inner.count_edges(relation).await
        }
    }

    const EVT_1: &str = r#"{"event_id":"evt_1","category":"fake_cashback","confidence":0.95,"risk_level":"high"}"#;

    fn pipeline(store: Arc<dyn GraphStore>, channel: Arc<MemoryEventChannel>) -> IngestPipeline {
        IngestPipeline::new(store, channel, "$Default").with_timing(Duration::from_millis(10), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_redelivered_event_stored_once() {
        let store = Arc::new(MemoryGraphStore::new());
        let channel = Arc::new(MemoryEventChannel::new(1));
        channel.publish_to(0, EVT_1).await.unwrap();
        channel.publish_to(0, EVT_1).await.unwrap();

        let summaries = pipeline(store.clone(), channel.clone()).drain().await.unwrap();

        assert_eq!(summaries[0].committed, 2);
        assert_eq!(summaries[0].checkpoint, Some(2));
        assert_eq!(store.count_vertices(Some(Label::FraudEvent)).await.unwrap(), 1);
        let stored = store.get_vertex(&VertexKey::fraud_event("evt_1")).await.unwrap().unwrap();
        assert_eq!(stored.as_fraud_event().unwrap().confidence, 0.95);
    }

    #[tokio::test]
    async fn test_bad_messages_dropped_without_checkpoint() {
        let store = Arc::new(MemoryGraphStore::new());
        let channel = Arc::new(MemoryEventChannel::new(1));
        channel.publish_to(0, "{not json").await.unwrap();
        channel
            .publish_to(
                0,
                r#"{"event_id":"evt_2","category":"job_scam","confidence":1.5,"risk_level":"high"}"#,
            )
            .await
            .unwrap();

        let summary = pipeline(store.clone(), channel.clone()).drain_partition(0).await.unwrap();

        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.committed, 0);
        assert_eq!(channel.load_checkpoint("$Default", 0).await.unwrap(), None);
        assert_eq!(store.count_vertices(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connectivity_failure_holds_checkpoint() {
        let store = Arc::new(FlakyStore::new(1));
        let channel = Arc::new(MemoryEventChannel::new(1));
        channel.publish_to(0, EVT_1).await.unwrap();
        let pipeline = pipeline(store.clone(), channel.clone());

        let delivery = channel.receive(0, 0, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(pipeline.handle_delivery(&delivery).await.unwrap(), Disposition::Retry);
        assert_eq!(channel.load_checkpoint("$Default", 0).await.unwrap(), None);

        // redelivered from the held checkpoint and written on the second attempt
        let summary = pipeline.drain_partition(0).await.unwrap();
        assert_eq!(summary.committed, 1);
        assert_eq!(channel.load_checkpoint("$Default", 0).await.unwrap(), Some(1));
        assert_eq!(store.inner.count_vertices(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_retries_then_succeeds() {
        let store = Arc::new(FlakyStore::new(2));
        let channel = Arc::new(MemoryEventChannel::new(1));
        channel.publish_to(0, EVT_1).await.unwrap();

        let summary = pipeline(store.clone(), channel.clone()).drain_partition(0).await.unwrap();

        assert_eq!(summary.retries, 2);
        assert_eq!(summary.committed, 1);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_drain_gives_up_on_persistent_outage() {
        let store = Arc::new(FlakyStore::new(u32::MAX));
        let channel = Arc::new(MemoryEventChannel::new(1));
        channel.publish_to(0, EVT_1).await.unwrap();

        let err = pipeline(store, channel.clone()).drain_partition(0).await.unwrap_err();
        assert!(matches!(err, FraudGraphError::Connectivity(_)));
        assert_eq!(channel.load_checkpoint("$Default", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryGraphStore::new());
        let channel = Arc::new(MemoryEventChannel::new(2));
        let pipeline = Arc::new(pipeline(store.clone(), channel.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(pipeline.run(rx));
        channel.publish("fake_cashback", EVT_1).await.unwrap();

        for _ in 0..100 {
            if store.count_vertices(None).await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();

        let summaries = handle.await.unwrap().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries.iter().map(|s| s.committed).sum::<u64>(), 1);
    }

    async fn run_until_worker_fails(fault: Fault) -> FraudGraphError {
        let store = Arc::new(FlakyStore::failing_with(fault, u32::MAX));
        let channel = Arc::new(MemoryEventChannel::new(3));
        channel.publish("fake_cashback", EVT_1).await.unwrap();
        let pipeline = Arc::new(pipeline(store, channel));
        // Shutdown is never requested; the failing worker alone must end the run
        let (_tx, rx) = watch::channel(false);

        tokio::time::timeout(Duration::from_secs(5), pipeline.run(rx))
            .await
            .expect("run did not stop after a worker failed")
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_configuration_failure_stops_all_workers() {
        let err = run_until_worker_fails(Fault::Configuration).await;
        assert!(matches!(err, FraudGraphError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_worker_panic_stops_run_with_error() {
        let err = run_until_worker_fails(Fault::Panic).await;
        assert!(matches!(err, FraudGraphError::Query(_)));
        assert!(err.to_string().contains("panicked"));
    }
}
