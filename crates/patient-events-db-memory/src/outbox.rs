use std::sync::Arc;

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use patient_events_storage::{OutboxEntry, OutboxStatus, OutboxStore, StorageError};
use time::OffsetDateTime;

/// In-memory outbox keyed by event id.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOutboxStore {
    entries: Arc<PapayaHashMap<String, OutboxEntry>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, entry: OutboxEntry) -> Result<(), StorageError> {
        if entry.pending_sinks.is_empty() {
            return Err(StorageError::invalid_record(
                "outbox entry has no pending sinks",
            ));
        }
        let guard = self.entries.pin();
        guard.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn due(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StorageError> {
        let guard = self.entries.pin();
        let mut due: Vec<OutboxEntry> = guard
            .values()
            .filter(|entry| entry.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|entry| entry.next_attempt_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn update(&self, entry: OutboxEntry) -> Result<(), StorageError> {
        let guard = self.entries.pin();
        if guard.get(&entry.id).is_none() {
            return Err(StorageError::not_found("outbox", &entry.id));
        }
        guard.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StorageError> {
        let guard = self.entries.pin();
        guard.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxEntry>, StorageError> {
        let guard = self.entries.pin();
        Ok(guard.get(id).cloned())
    }

    async fn list(&self, status: Option<OutboxStatus>) -> Result<Vec<OutboxEntry>, StorageError> {
        let guard = self.entries.pin();
        let mut entries: Vec<OutboxEntry> = guard
            .values()
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }
}
