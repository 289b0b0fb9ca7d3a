//! # patient-events-storage
//!
//! Storage abstraction layer for the patient event pipeline.
//!
//! This crate defines the traits and record types that storage backends
//! implement. It contains no implementations; see `patient-events-db-memory`.
//!
//! ## Overview
//!
//! - [`AuditStore`]: append-only audit trail with conditional insert
//! - [`OutboxStore`]: events awaiting redelivery to a sink
//! - [`CheckpointStore`]: change-feed continuation tokens

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{AuditStore, CheckpointStore, OutboxStore};
pub use types::{AuditRecord, InsertOutcome, OutboxEntry, OutboxStatus, UNKNOWN_PARTITION};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Shared audit store handle.
pub type DynAuditStore = std::sync::Arc<dyn AuditStore>;

/// Shared outbox store handle.
pub type DynOutboxStore = std::sync::Arc<dyn OutboxStore>;

/// Shared checkpoint store handle.
pub type DynCheckpointStore = std::sync::Arc<dyn CheckpointStore>;
