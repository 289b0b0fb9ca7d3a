use patient_events_bus::TopicMessage;
use patient_events_core::DomainEvent;
use patient_events_storage::{AuditRecord, DynAuditStore, InsertOutcome, StorageError};
use tracing::{info, warn};

use crate::metrics;

pub const CREATED_ACTION: &str = "Patient record created in system";
pub const UPDATED_ACTION: &str = "Patient record updated";
pub const DELETED_ACTION: &str = "Patient record deleted from system";

/// Result of writing an audit record.
pub type AuditOutcome = InsertOutcome;

pub fn action_for(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::Created(_) => CREATED_ACTION,
        DomainEvent::Updated(_) => UPDATED_ACTION,
        DomainEvent::Deleted(_) => DELETED_ACTION,
    }
}

pub fn unknown_action(event_type: &str) -> String {
    format!("Unknown event type: {event_type}")
}

/// Append-only audit log keyed by (patient id, event id).
#[derive(Clone)]
pub struct AuditSink {
    store: DynAuditStore,
}

impl AuditSink {
    pub fn new(store: DynAuditStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DynAuditStore {
        &self.store
    }

    /// Write the audit record for `event`, keeping the raw message body.
    pub async fn record_audit(
        &self,
        event: &DomainEvent,
        envelope: &TopicMessage,
    ) -> Result<AuditOutcome, StorageError> {
        let action = action_for(event);
        let record = AuditRecord::for_event(
            event,
            action,
            envelope.body_text(),
            envelope.correlation_id.clone(),
        );
        let outcome = self.store.insert_if_absent(record).await?;
        self.log_outcome(outcome, event.event_id(), &event.patient_id().to_string(), action);
        Ok(outcome)
    }

    /// Write a fallback record for a message of an unrecognised type.
    pub async fn record_unknown(
        &self,
        envelope: &TopicMessage,
        event_type: &str,
    ) -> Result<AuditOutcome, StorageError> {
        let action = unknown_action(event_type);
        let record = AuditRecord::for_unknown(
            &envelope.message_id,
            event_type,
            envelope.patient_id(),
            &action,
            envelope.body_text(),
            envelope.correlation_id.clone(),
        );
        let partition = record.partition_key.clone();
        let outcome = self.store.insert_if_absent(record).await?;
        self.log_outcome(outcome, &envelope.message_id, &partition, &action);
        Ok(outcome)
    }

    fn log_outcome(&self, outcome: AuditOutcome, event_id: &str, partition: &str, action: &str) {
        match outcome {
            InsertOutcome::Inserted => {
                info!(event_id, patient_id = %partition, action, "Audit log created");
            }
            InsertOutcome::Duplicate => {
                metrics::record_audit_duplicate();
                warn!(
                    event_id,
                    patient_id = %partition,
                    "audit record already present; redelivery ignored"
                );
            }
        }
    }
}
