//! Record types persisted by the storage backends.

use patient_events_core::{DomainEvent, PublishSink};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// ============================================================================
// Audit
// ============================================================================

/// Partition key used for audit rows whose patient id could not be read.
pub const UNKNOWN_PARTITION: &str = "unknown";

/// One row of the audit trail.
///
/// Keyed by (`partition_key`, `row_key`) = (patient id, event id). Records are
/// never modified once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub partition_key: String,
    pub row_key: String,
    pub event_id: String,
    pub event_type: String,
    pub patient_id: Option<i64>,
    pub patient_name: Option<String>,
    pub nhs_number: Option<String>,
    pub gp_practice: Option<String>,
    pub action: String,
    /// Raw serialized message body
    pub event_data: String,
    pub correlation_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl AuditRecord {
    /// Build a record for a decoded domain event.
    #[must_use]
    pub fn for_event(
        event: &DomainEvent,
        action: impl Into<String>,
        event_data: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            partition_key: event.patient_id().to_string(),
            row_key: event.event_id().to_string(),
            event_id: event.event_id().to_string(),
            event_type: event.event_type().as_str().to_string(),
            patient_id: Some(event.patient_id()),
            patient_name: Some(event.name().to_string()),
            nhs_number: Some(event.nhs_number().to_string()),
            gp_practice: Some(event.gp_practice().to_string()),
            action: action.into(),
            event_data: event_data.into(),
            correlation_id,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Build a record for a message whose type is not recognised.
    ///
    /// Only envelope data is available, so the patient fields stay empty.
    #[must_use]
    pub fn for_unknown(
        message_id: impl Into<String>,
        event_type: impl Into<String>,
        patient_id: Option<i64>,
        action: impl Into<String>,
        event_data: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        let message_id = message_id.into();
        Self {
            partition_key: patient_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| UNKNOWN_PARTITION.to_string()),
            row_key: message_id.clone(),
            event_id: message_id,
            event_type: event_type.into(),
            patient_id,
            patient_name: None,
            nhs_number: None,
            gp_practice: None,
            action: action.into(),
            event_data: event_data.into(),
            correlation_id,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written.
    Inserted,
    /// A record with the same key already existed; nothing was written.
    Duplicate,
}

impl InsertOutcome {
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Lifecycle state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Waiting for the relay to retry.
    Pending,
    /// Retries exhausted; kept for operator inspection.
    Failed,
}

/// An event whose publish did not reach every sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Same as the event id.
    pub id: String,
    pub event: DomainEvent,
    pub pending_sinks: Vec<PublishSink>,
    /// Relay attempts made so far; the initial publish is not counted.
    pub attempts: u32,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub next_attempt_at: OffsetDateTime,
    pub status: OutboxStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl OutboxEntry {
    /// Creates a new pending entry.
    #[must_use]
    pub fn new(
        event: DomainEvent,
        pending_sinks: Vec<PublishSink>,
        last_error: impl Into<String>,
        next_attempt_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: event.event_id().to_string(),
            event,
            pending_sinks,
            attempts: 0,
            last_error: Some(last_error.into()),
            next_attempt_at,
            status: OutboxStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns true if the entry should be retried at `now`.
    #[must_use]
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at <= now
    }

    /// Record a failed relay attempt, narrowing the pending sinks.
    pub fn record_failure(
        &mut self,
        still_pending: Vec<PublishSink>,
        error: impl Into<String>,
        next_attempt_at: OffsetDateTime,
    ) {
        self.attempts += 1;
        self.pending_sinks = still_pending;
        self.last_error = Some(error.into());
        self.next_attempt_at = next_attempt_at;
    }

    /// Stop retrying.
    pub fn mark_failed(&mut self) {
        self.status = OutboxStatus::Failed;
    }
}
