pub mod email;
pub mod simulated;
pub mod webhook;

use async_trait::async_trait;

use crate::error::NotificationError;
use crate::provider::ProviderConfig;
use crate::types::{Notification, NotificationChannel};

/// Result of sending a notification
#[derive(Debug)]
pub struct SendResult {
    pub success: bool,
    pub external_id: Option<String>,
    pub error: Option<String>,
    /// The provider rejected the send for now; a later attempt may succeed
    pub retryable: bool,
}

impl SendResult {
    pub fn sent(external_id: Option<String>) -> Self {
        Self {
            success: true,
            external_id,
            error: None,
            retryable: false,
        }
    }

    pub fn failed(error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            external_id: None,
            error: Some(error.into()),
            retryable,
        }
    }

    /// Turn an unsuccessful result into an error.
    pub fn into_result(self) -> Result<Option<String>, NotificationError> {
        if self.success {
            return Ok(self.external_id);
        }
        let error = self
            .error
            .unwrap_or_else(|| "provider reported failure".to_string());
        if self.retryable {
            Err(NotificationError::Unavailable(error))
        } else {
            Err(NotificationError::SendFailed(error))
        }
    }
}

/// Rendered notification content
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body: String,
}

/// Adapter for sending notifications
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    /// Send a notification
    async fn send(
        &self,
        config: &ProviderConfig,
        notification: &Notification,
        rendered_content: &RenderedContent,
    ) -> Result<SendResult, NotificationError>;

    /// Check if adapter can handle this channel
    fn supports(&self, channel: NotificationChannel) -> bool;
}

pub use email::EmailAdapter;
pub use simulated::SimulatedAdapter;
pub use webhook::WebhookAdapter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_result_into_result() {
        assert_eq!(
            SendResult::sent(Some("abc".into())).into_result().unwrap(),
            Some("abc".to_string())
        );
        assert!(matches!(
            SendResult::failed("550 mailbox unavailable", false).into_result(),
            Err(NotificationError::SendFailed(_))
        ));
        assert!(matches!(
            SendResult::failed("503 try later", true).into_result(),
            Err(NotificationError::Unavailable(_))
        ));
    }
}
