use std::sync::Arc;

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use patient_events_storage::{CheckpointStore, StorageError};

/// In-memory change-feed checkpoints, one token per partition.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    tokens: Arc<PapayaHashMap<String, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, partition: &str, continuation: &str) -> Result<(), StorageError> {
        let guard = self.tokens.pin();
        guard.insert(partition.to_string(), continuation.to_string());
        Ok(())
    }

    async fn load(&self, partition: &str) -> Result<Option<String>, StorageError> {
        let guard = self.tokens.pin();
        Ok(guard.get(partition).cloned())
    }
}
