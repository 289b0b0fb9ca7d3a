//! In-memory storage backend for the patient event pipeline.
//!
//! Implements the `patient-events-storage` traits on papaya lock-free
//! HashMaps.
//!
//! # Example
//!
//! ```ignore
//! use patient_events_db_memory::InMemoryAuditStore;
//! use patient_events_storage::AuditStore;
//!
//! let store = InMemoryAuditStore::new();
//! let outcome = store.insert_if_absent(record).await?;
//! ```

mod audit;
mod checkpoint;
pub mod factory;
mod outbox;

pub use audit::{AuditKey, InMemoryAuditStore};
pub use checkpoint::InMemoryCheckpointStore;
pub use factory::{StorageBackend, Stores, create_stores};
pub use outbox::InMemoryOutboxStore;
