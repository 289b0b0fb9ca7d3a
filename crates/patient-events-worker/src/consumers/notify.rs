use async_trait::async_trait;
use patient_events_bus::TopicMessage;
use patient_events_core::DomainEvent;
use patient_events_notifications::NotificationSink;
use tracing::warn;

use super::handler::{Handled, HandlerError, MessageHandler};

pub const NOTIFY_DEAD_LETTER_REASON: &str = "ProcessingError";

/// Drains the notification subscription into the [`NotificationSink`].
pub struct NotificationHandler {
    sink: NotificationSink,
}

impl NotificationHandler {
    pub fn new(sink: NotificationSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MessageHandler for NotificationHandler {
    fn dead_letter_reason(&self) -> &'static str {
        NOTIFY_DEAD_LETTER_REASON
    }

    async fn handle(
        &self,
        event: DomainEvent,
        _message: &TopicMessage,
    ) -> Result<Handled, HandlerError> {
        self.sink.notify(&event).await?;
        Ok(Handled::Processed)
    }

    async fn handle_unknown(
        &self,
        event_type: &str,
        message: &TopicMessage,
    ) -> Result<(), HandlerError> {
        warn!(
            message_id = %message.message_id,
            "Unknown event type: {event_type}"
        );
        Ok(())
    }
}
