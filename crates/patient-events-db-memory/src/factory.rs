use std::sync::Arc;

use patient_events_storage::{DynAuditStore, DynCheckpointStore, DynOutboxStore};
use serde::{Deserialize, Serialize};

use crate::{InMemoryAuditStore, InMemoryCheckpointStore, InMemoryOutboxStore};

/// Supported storage backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-memory storage implemented on top of papaya::HashMap
    #[default]
    Memory,
}

/// The set of stores one pipeline instance runs against.
#[derive(Clone)]
pub struct Stores {
    pub audit: DynAuditStore,
    pub outbox: DynOutboxStore,
    pub checkpoints: DynCheckpointStore,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Create the stores for a backend.
///
/// For now, only the in-memory papaya backend is supported.
pub fn create_stores(backend: StorageBackend) -> Stores {
    match backend {
        StorageBackend::Memory => Stores {
            audit: Arc::new(InMemoryAuditStore::new()),
            outbox: Arc::new(InMemoryOutboxStore::new()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_stores() {
        let stores = create_stores(StorageBackend::default());
        assert!(stores.audit.list_for_patient("1").await.unwrap().is_empty());
        assert!(stores.outbox.list(None).await.unwrap().is_empty());
        assert_eq!(stores.checkpoints.load("p").await.unwrap(), None);
    }
}
