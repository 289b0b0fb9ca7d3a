//! Storage traits for the pipeline's persistent state.
//!
//! Backends must be thread-safe (`Send + Sync`); the pipeline shares one
//! instance of each store across all workers.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::types::{AuditRecord, InsertOutcome, OutboxEntry, OutboxStatus};

/// Append-only audit trail, partitioned by patient.
///
/// # Example
///
/// ```ignore
/// use patient_events_storage::{AuditStore, InsertOutcome};
///
/// match store.insert_if_absent(record).await? {
///     InsertOutcome::Inserted => {}
///     InsertOutcome::Duplicate => tracing::debug!("redelivered message"),
/// }
/// ```
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Writes the record unless one with the same (partition key, row key)
    /// exists.
    ///
    /// A pre-existing record is reported as [`InsertOutcome::Duplicate`],
    /// not as an error, and is left untouched.
    async fn insert_if_absent(&self, record: AuditRecord) -> Result<InsertOutcome, StorageError>;

    /// Reads one record by key.
    async fn get(
        &self,
        partition_key: &str,
        event_id: &str,
    ) -> Result<Option<AuditRecord>, StorageError>;

    /// Returns every record for a patient, oldest first.
    async fn list_for_patient(&self, partition_key: &str)
    -> Result<Vec<AuditRecord>, StorageError>;
}

/// Durable store of events that still owe a delivery to one or more sinks.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts or replaces an entry keyed by its event id.
    async fn enqueue(&self, entry: OutboxEntry) -> Result<(), StorageError>;

    /// Returns up to `limit` pending entries due at `now`, earliest first.
    async fn due(&self, now: OffsetDateTime, limit: usize)
    -> Result<Vec<OutboxEntry>, StorageError>;

    /// Replaces an existing entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no entry has this id.
    async fn update(&self, entry: OutboxEntry) -> Result<(), StorageError>;

    /// Removes an entry once every sink has been delivered.
    async fn remove(&self, id: &str) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Option<OutboxEntry>, StorageError>;

    /// Lists entries, optionally only those in one status.
    async fn list(&self, status: Option<OutboxStatus>) -> Result<Vec<OutboxEntry>, StorageError>;
}

/// Change-feed progress, one continuation token per partition.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, partition: &str, continuation: &str) -> Result<(), StorageError>;

    async fn load(&self, partition: &str) -> Result<Option<String>, StorageError>;
}
