use async_trait::async_trait;
use patient_events_bus::TopicMessage;
use patient_events_core::DomainEvent;

use super::handler::{Handled, HandlerError, MessageHandler};
use crate::audit::AuditSink;

pub const AUDIT_DEAD_LETTER_REASON: &str = "AuditLoggingError";

/// Drains the audit subscription into the [`AuditSink`].
pub struct AuditHandler {
    sink: AuditSink,
}

impl AuditHandler {
    pub fn new(sink: AuditSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MessageHandler for AuditHandler {
    fn dead_letter_reason(&self) -> &'static str {
        AUDIT_DEAD_LETTER_REASON
    }

    async fn handle(
        &self,
        event: DomainEvent,
        message: &TopicMessage,
    ) -> Result<Handled, HandlerError> {
        let outcome = self.sink.record_audit(&event, message).await?;
        Ok(if outcome.is_duplicate() {
            Handled::Duplicate
        } else {
            Handled::Processed
        })
    }

    async fn handle_unknown(
        &self,
        event_type: &str,
        message: &TopicMessage,
    ) -> Result<(), HandlerError> {
        self.sink.record_unknown(message, event_type).await?;
        Ok(())
    }
}
