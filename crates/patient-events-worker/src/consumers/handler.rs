use async_trait::async_trait;
use patient_events_bus::TopicMessage;
use patient_events_core::DomainEvent;
use patient_events_notifications::NotificationError;
use patient_events_storage::StorageError;

/// Failure reported by a [`MessageHandler`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// Worth another delivery; the message is abandoned.
    #[error("{0}")]
    Transient(String),

    /// Will not succeed on redelivery; the message is dead-lettered.
    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StorageError> for HandlerError {
    fn from(e: StorageError) -> Self {
        if e.is_transient() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

impl From<NotificationError> for HandlerError {
    fn from(e: NotificationError) -> Self {
        if e.is_transient() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

/// Successful handling of a known event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Processed,
    /// Already handled on an earlier delivery
    Duplicate,
}

/// Per-subscription business logic driven by a
/// [`SubscriptionConsumer`](super::SubscriptionConsumer).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Reason recorded when a message is dead-lettered after a permanent
    /// failure.
    fn dead_letter_reason(&self) -> &'static str;

    async fn handle(
        &self,
        event: DomainEvent,
        message: &TopicMessage,
    ) -> Result<Handled, HandlerError>;

    /// Fallback for messages whose `EventType` is not recognised.
    async fn handle_unknown(
        &self,
        event_type: &str,
        message: &TopicMessage,
    ) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions_keep_retryability() {
        assert!(HandlerError::from(StorageError::unavailable("throttled")).is_transient());
        assert!(!HandlerError::from(StorageError::invalid_record("empty key")).is_transient());
        assert!(HandlerError::from(NotificationError::Unavailable("421".into())).is_transient());
        assert!(!HandlerError::from(NotificationError::RecipientNotFound).is_transient());
    }
}
