//! Change feed abstraction and its in-memory implementation, plus the
//! queue that carries deletion notices.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use patient_events_core::DeletionNotice;
use patient_events_storage::{DynCheckpointStore, StorageError, UNKNOWN_PARTITION};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Documents changed in one partition, in feed order.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub partition: String,
    pub documents: Vec<Value>,
    /// Position to resume after once this batch is durable
    pub continuation: String,
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Next batch, or `None` once the feed is closed or `cancel` fires.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no
    /// batch.
    async fn next_batch(&self, cancel: &CancellationToken) -> Option<ChangeBatch>;

    /// Mark `batch` as processed for its partition.
    async fn checkpoint(&self, batch: &ChangeBatch) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
#[error("change feed closed")]
pub struct FeedClosed;

/// Producer half of [`InMemoryChangeFeed`].
#[derive(Clone)]
pub struct ChangeFeedSender {
    sender: mpsc::Sender<ChangeBatch>,
    sequence: Arc<AtomicU64>,
}

impl ChangeFeedSender {
    /// Queue one batch for a partition.
    pub async fn push(
        &self,
        partition: impl Into<String>,
        documents: Vec<Value>,
    ) -> Result<(), FeedClosed> {
        let continuation = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.sender
            .send(ChangeBatch {
                partition: partition.into(),
                documents,
                continuation: continuation.to_string(),
            })
            .await
            .map_err(|_| FeedClosed)
    }

    /// Group documents by `gpPractice` and queue one batch per practice.
    ///
    /// Returns the number of batches queued.
    pub async fn push_documents(&self, documents: Vec<Value>) -> Result<usize, FeedClosed> {
        let partitions = partition_documents(documents);
        let count = partitions.len();
        for (partition, docs) in partitions {
            self.push(partition, docs).await?;
        }
        Ok(count)
    }
}

/// Split documents by their partition key, keeping input order within each
/// partition. Documents without a usable `gpPractice` share one partition.
pub fn partition_documents(documents: Vec<Value>) -> BTreeMap<String, Vec<Value>> {
    let mut partitions: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for doc in documents {
        let key = doc
            .get("gpPractice")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_PARTITION)
            .to_string();
        partitions.entry(key).or_default().push(doc);
    }
    partitions
}

/// Change feed fed through a bounded channel, checkpointing to a
/// [`CheckpointStore`](patient_events_storage::CheckpointStore).
pub struct InMemoryChangeFeed {
    receiver: Mutex<mpsc::Receiver<ChangeBatch>>,
    checkpoints: DynCheckpointStore,
}

impl InMemoryChangeFeed {
    pub fn channel(capacity: usize, checkpoints: DynCheckpointStore) -> (ChangeFeedSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            ChangeFeedSender {
                sender,
                sequence: Arc::new(AtomicU64::new(0)),
            },
            Self {
                receiver: Mutex::new(receiver),
                checkpoints,
            },
        )
    }

    /// Last checkpointed continuation for `partition`.
    pub async fn last_checkpoint(&self, partition: &str) -> Result<Option<String>, StorageError> {
        self.checkpoints.load(partition).await
    }
}

#[async_trait]
impl ChangeFeed for InMemoryChangeFeed {
    async fn next_batch(&self, cancel: &CancellationToken) -> Option<ChangeBatch> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            batch = receiver.recv() => batch,
        }
    }

    async fn checkpoint(&self, batch: &ChangeBatch) -> Result<(), StorageError> {
        self.checkpoints
            .save(&batch.partition, &batch.continuation)
            .await
    }
}

/// Producer half of [`DeletionQueue`].
#[derive(Clone)]
pub struct DeletionSender {
    sender: mpsc::Sender<DeletionNotice>,
}

impl DeletionSender {
    pub async fn send(&self, notice: DeletionNotice) -> Result<(), FeedClosed> {
        self.sender.send(notice).await.map_err(|_| FeedClosed)
    }
}

/// Deletion notices waiting for the processor.
///
/// Removed patients never appear in the change feed, so they arrive here.
pub struct DeletionQueue {
    receiver: mpsc::Receiver<DeletionNotice>,
}

impl DeletionQueue {
    pub fn channel(capacity: usize) -> (DeletionSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (DeletionSender { sender }, Self { receiver })
    }

    /// Next notice, or `None` once every sender is dropped or `cancel` fires.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<DeletionNotice> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            notice = self.receiver.recv() => notice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patient_events_db_memory::InMemoryCheckpointStore;
    use serde_json::json;

    #[test]
    fn test_partition_documents_by_practice() {
        let partitions = partition_documents(vec![
            json!({"patientId": 1, "gpPractice": "North"}),
            json!({"patientId": 2, "gpPractice": "South"}),
            json!({"patientId": 3, "gpPractice": "North"}),
            json!({"patientId": 4}),
        ]);

        assert_eq!(partitions.len(), 3);
        let north: Vec<_> = partitions["North"]
            .iter()
            .map(|d| d["patientId"].as_i64().unwrap())
            .collect();
        assert_eq!(north, vec![1, 3]);
        assert_eq!(partitions[UNKNOWN_PARTITION].len(), 1);
    }

    #[tokio::test]
    async fn test_batches_flow_and_checkpoint() {
        let (sender, feed) = InMemoryChangeFeed::channel(4, Arc::new(InMemoryCheckpointStore::new()));
        let cancel = CancellationToken::new();

        sender.push("North", vec![json!({"patientId": 1})]).await.unwrap();
        sender.push("North", vec![json!({"patientId": 2})]).await.unwrap();

        let first = feed.next_batch(&cancel).await.unwrap();
        let second = feed.next_batch(&cancel).await.unwrap();
        assert_eq!(first.continuation, "1");
        assert_eq!(second.continuation, "2");

        feed.checkpoint(&first).await.unwrap();
        assert_eq!(feed.last_checkpoint("North").await.unwrap().as_deref(), Some("1"));
        feed.checkpoint(&second).await.unwrap();
        assert_eq!(feed.last_checkpoint("North").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_next_batch_stops_on_cancel() {
        let (_sender, feed) = InMemoryChangeFeed::channel(4, Arc::new(InMemoryCheckpointStore::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(feed.next_batch(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_feed_ends_when_sender_dropped() {
        let (sender, feed) = InMemoryChangeFeed::channel(4, Arc::new(InMemoryCheckpointStore::new()));
        drop(sender);
        assert!(feed.next_batch(&CancellationToken::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_deletion_queue_delivers_until_closed() {
        let (sender, mut queue) = DeletionQueue::channel(2);
        let cancel = CancellationToken::new();

        sender
            .send(DeletionNotice {
                patient_id: 9,
                nhs_number: "943 476 5919".into(),
                name: "Tom Baker".into(),
                gp_practice: "Riverside Surgery".into(),
                deleted_at: None,
            })
            .await
            .unwrap();
        drop(sender);

        assert_eq!(queue.next(&cancel).await.unwrap().patient_id, 9);
        assert!(queue.next(&cancel).await.is_none());
    }
}
