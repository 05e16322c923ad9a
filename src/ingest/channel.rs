//! Partitioned, at-least-once event channel.
//!
//! Nothing is ever removed from a partition; consumers track their progress
//! through per-group checkpoints and may see a message more than once.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::db::Db;
use crate::error::{FraudGraphError, Result};

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub partition: u32,
    pub sequence_number: i64,
    pub payload: String,
    pub enqueued_at: String,
}

#[async_trait]
pub trait EventChannel: Send + Sync {
    fn partitions(&self) -> u32;

    /// Append to the partition chosen by `partition_key`.
    /// Returns the (partition, sequence number) assigned.
    async fn publish(&self, partition_key: &str, payload: &str) -> Result<(u32, i64)>;

    /// Next message with a sequence number greater than `after_sequence`,
    /// waiting up to `wait` for one to arrive.
    async fn receive(&self, partition: u32, after_sequence: i64, wait: Duration) -> Result<Option<Delivery>>;

    /// Record progress. Never moves a checkpoint backwards.
    async fn checkpoint(&self, group: &str, partition: u32, sequence_number: i64) -> Result<()>;

    async fn load_checkpoint(&self, group: &str, partition: u32) -> Result<Option<i64>>;
}

/// Map a partition key onto one of `partitions` partitions.
pub fn partition_for(partition_key: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(partition_key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(partitions.max(1))) as u32
}

fn check_partition(partition: u32, partitions: u32) -> Result<()> {
    if partition >= partitions {
        return Err(FraudGraphError::Query(format!(
            "partition {} out of range (channel has {})",
            partition, partitions
        )));
    }
    Ok(())
}

/// Event log persisted in the graph database's `event_log` table.
pub struct SqliteEventLog {
    db: Db,
    partitions: u32,
    poll_interval: Duration,
}

impl SqliteEventLog {
    pub fn new(db: Db, partitions: u32, poll_interval: Duration) -> Self {
        Self {
            db,
            partitions: partitions.max(1),
            poll_interval,
        }
    }

    async fn next_after(&self, partition: u32, after_sequence: i64) -> Result<Option<Delivery>> {
        self.db
            .with_connection(move |conn| {
                let delivery = conn
                    .query_row(
                        "SELECT sequence_number, payload, enqueued_at FROM event_log \
                         WHERE partition_id = ?1 AND sequence_number > ?2 \
                         ORDER BY sequence_number LIMIT 1",
                        params![partition, after_sequence],
                        |row| {
                            Ok(Delivery {
                                partition,
                                sequence_number: row.get(0)?,
                                payload: row.get(1)?,
                                enqueued_at: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(delivery)
            })
            .await
    }
}

#[async_trait]
impl EventChannel for SqliteEventLog {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn publish(&self, partition_key: &str, payload: &str) -> Result<(u32, i64)> {
        let partition = partition_for(partition_key, self.partitions);
        let payload = payload.to_string();
        let enqueued_at = chrono::Utc::now().to_rfc3339();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let sequence: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM event_log WHERE partition_id = ?1",
                    params![partition],
                    |row| row.get(0),
                )?;
                tx.execute(
                    "INSERT INTO event_log (partition_id, sequence_number, payload, enqueued_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![partition, sequence, payload, enqueued_at],
                )?;
                tx.commit()?;
                Ok((partition, sequence))
            })
            .await
    }

    async fn receive(&self, partition: u32, after_sequence: i64, wait: Duration) -> Result<Option<Delivery>> {
        check_partition(partition, self.partitions)?;
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.next_after(partition, after_sequence).await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn checkpoint(&self, group: &str, partition: u32, sequence_number: i64) -> Result<()> {
        check_partition(partition, self.partitions)?;
        let group = group.to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO checkpoints (consumer_group, partition_id, sequence_number, updated_at) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(consumer_group, partition_id) DO UPDATE SET \
                         sequence_number = MAX(sequence_number, excluded.sequence_number), \
                         updated_at = excluded.updated_at",
                    params![group, partition, sequence_number, updated_at],
                )?;
                Ok(())
            })
            .await
    }

    async fn load_checkpoint(&self, group: &str, partition: u32) -> Result<Option<i64>> {
        check_partition(partition, self.partitions)?;
        let group = group.to_string();

        self.db
            .with_connection(move |conn| {
                let sequence = conn
                    .query_row(
                        "SELECT sequence_number FROM checkpoints WHERE consumer_group = ?1 AND partition_id = ?2",
                        params![group, partition],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(sequence)
            })
            .await
    }
}

#[derive(Default)]
struct Log {
    partitions: Vec<Vec<Delivery>>,
    checkpoints: HashMap<(String, u32), i64>,
}

/// In-process channel with the same delivery semantics as the SQLite log.
pub struct MemoryEventChannel {
    log: Mutex<Log>,
    arrivals: Notify,
    partitions: u32,
}

impl MemoryEventChannel {
    pub fn new(partitions: u32) -> Self {
        let partitions = partitions.max(1);
        Self {
            log: Mutex::new(Log {
                partitions: vec![Vec::new(); partitions as usize],
                checkpoints: HashMap::new(),
            }),
            arrivals: Notify::new(),
            partitions,
        }
    }

    /// Append straight to a partition, bypassing key hashing.
    pub async fn publish_to(&self, partition: u32, payload: &str) -> Result<i64> {
        check_partition(partition, self.partitions)?;
        let mut log = self.log.lock().await;
        let messages = &mut log.partitions[partition as usize];
        let sequence_number = messages.len() as i64 + 1;
        messages.push(Delivery {
            partition,
            sequence_number,
            payload: payload.to_string(),
            enqueued_at: chrono::Utc::now().to_rfc3339(),
        });
        drop(log);
        self.arrivals.notify_waiters();
        Ok(sequence_number)
    }
}

#[async_trait]
impl EventChannel for MemoryEventChannel {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn publish(&self, partition_key: &str, payload: &str) -> Result<(u32, i64)> {
        let partition = partition_for(partition_key, self.partitions);
        let sequence_number = self.publish_to(partition, payload).await?;
        Ok((partition, sequence_number))
    }

    async fn receive(&self, partition: u32, after_sequence: i64, wait: Duration) -> Result<Option<Delivery>> {
        check_partition(partition, self.partitions)?;
        let deadline = Instant::now() + wait;
        loop {
            // register interest before looking so a publish in between is not missed
            let arrival = self.arrivals.notified();
            {
                let log = self.log.lock().await;
                if let Some(delivery) = log.partitions[partition as usize]
                    .iter()
                    .find(|d| d.sequence_number > after_sequence)
                {
                    return Ok(Some(delivery.clone()));
                }
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn checkpoint(&self, group: &str, partition: u32, sequence_number: i64) -> Result<()> {
        check_partition(partition, self.partitions)?;
        let mut log = self.log.lock().await;
        let entry = log
            .checkpoints
            .entry((group.to_string(), partition))
            .or_insert(sequence_number);
        *entry = (*entry).max(sequence_number);
        Ok(())
    }

    async fn load_checkpoint(&self, group: &str, partition: u32) -> Result<Option<i64>> {
        check_partition(partition, self.partitions)?;
        let log = self.log.lock().await;
        Ok(log.checkpoints.get(&(group.to_string(), partition)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup_log(partitions: u32) -> (SqliteEventLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("events.db"));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (SqliteEventLog::new(db, partitions, Duration::from_millis(10)), temp_dir)
    }

    #[test]
    fn test_partition_for_is_stable_and_in_range() {
        for key in ["fake_cashback", "digital_arrest", "job_scam", ""] {
            let p = partition_for(key, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(key, 4));
        }
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[tokio::test]
    async fn test_sqlite_publish_and_receive_in_order() {
        let (log, _temp) = setup_log(2).await;
        let (partition, first) = log.publish("job_scam", "one").await.unwrap();
        let (same, second) = log.publish("job_scam", "two").await.unwrap();
        assert_eq!(partition, same);
        assert_eq!((first, second), (1, 2));

        let d1 = log.receive(partition, 0, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(d1.payload, "one");
        let d2 = log.receive(partition, d1.sequence_number, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(d2.payload, "two");
        assert!(log.receive(partition, d2.sequence_number, Duration::from_millis(30)).await.unwrap().is_none());

        // nothing is consumed by reading
        let again = log.receive(partition, 0, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again, d1);
    }

    #[tokio::test]
    async fn test_sqlite_checkpoints_are_monotonic() {
        let (log, _temp) = setup_log(1).await;
        assert_eq!(log.load_checkpoint("$Default", 0).await.unwrap(), None);

        log.checkpoint("$Default", 0, 5).await.unwrap();
        log.checkpoint("$Default", 0, 3).await.unwrap();
        assert_eq!(log.load_checkpoint("$Default", 0).await.unwrap(), Some(5));
        assert_eq!(log.load_checkpoint("audit", 0).await.unwrap(), None);

        let err = log.checkpoint("$Default", 7, 1).await.unwrap_err();
        assert!(matches!(err, FraudGraphError::Query(_)));
    }

    #[tokio::test]
    async fn test_memory_receive_wakes_on_publish() {
        let channel = Arc::new(MemoryEventChannel::new(1));
        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.receive(0, 0, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.publish_to(0, "late").await.unwrap();

        let delivery = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, "late");
        assert_eq!(delivery.sequence_number, 1);
    }

    #[tokio::test]
    async fn test_memory_checkpoints_are_monotonic() {
        let channel = MemoryEventChannel::new(2);
        channel.checkpoint("$Default", 1, 4).await.unwrap();
        channel.checkpoint("$Default", 1, 2).await.unwrap();
        assert_eq!(channel.load_checkpoint("$Default", 1).await.unwrap(), Some(4));
        assert!(channel.receive(1, 0, Duration::ZERO).await.unwrap().is_none());
    }
}
