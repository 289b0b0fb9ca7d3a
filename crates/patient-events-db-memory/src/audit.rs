use std::sync::Arc;

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use patient_events_storage::{AuditRecord, AuditStore, InsertOutcome, StorageError};

/// (partition key, row key)
pub type AuditKey = (String, String);

/// In-memory audit trail using a papaya lock-free HashMap.
///
/// The conditional insert is a single `try_insert`, so concurrent
/// redeliveries of one event race to exactly one stored row.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditStore {
    records: Arc<PapayaHashMap<AuditKey, AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.records.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn insert_if_absent(&self, record: AuditRecord) -> Result<InsertOutcome, StorageError> {
        if record.partition_key.is_empty() || record.row_key.is_empty() {
            return Err(StorageError::invalid_record(
                "audit record requires a partition key and a row key",
            ));
        }

        let key = (record.partition_key.clone(), record.row_key.clone());
        let guard = self.records.pin();
        match guard.try_insert(key, record) {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(_) => Ok(InsertOutcome::Duplicate),
        }
    }

    async fn get(
        &self,
        partition_key: &str,
        event_id: &str,
    ) -> Result<Option<AuditRecord>, StorageError> {
        let key = (partition_key.to_string(), event_id.to_string());
        let guard = self.records.pin();
        Ok(guard.get(&key).cloned())
    }

    async fn list_for_patient(
        &self,
        partition_key: &str,
    ) -> Result<Vec<AuditRecord>, StorageError> {
        let guard = self.records.pin();
        let mut records: Vec<AuditRecord> = guard
            .iter()
            .filter(|((pk, _), _)| pk == partition_key)
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.row_key.cmp(&b.row_key))
        });
        Ok(records)
    }
}
