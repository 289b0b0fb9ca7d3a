use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{NotificationAdapter, RenderedContent, SendResult};
use crate::error::NotificationError;
use crate::provider::ProviderConfig;
use crate::types::{Notification, NotificationChannel};

/// Default simulated send latency.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(100);

/// Stands in for a real provider: waits, then logs what would have been sent.
pub struct SimulatedAdapter {
    latency: Duration,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::with_latency(DEFAULT_LATENCY)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationAdapter for SimulatedAdapter {
    async fn send(
        &self,
        _config: &ProviderConfig,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<SendResult, NotificationError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        info!(
            notification_id = %notification.id,
            template = %notification.template_id,
            recipient = %notification.recipient.reference,
            subject = content.subject.as_deref().unwrap_or(""),
            "simulated notification sent"
        );

        Ok(SendResult::sent(Some(notification.id.clone())))
    }

    fn supports(&self, channel: NotificationChannel) -> bool {
        channel == NotificationChannel::Simulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationRecipient;
    use std::collections::HashMap;
    use time::OffsetDateTime;

    fn notification() -> Notification {
        Notification {
            id: "n-1".into(),
            channel: NotificationChannel::Simulated,
            recipient: NotificationRecipient {
                reference: "Patient/1".into(),
                ..Default::default()
            },
            template_id: "patient-welcome".into(),
            template_data: HashMap::new(),
            event_id: "e-1".into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_send_waits_for_latency() {
        let adapter = SimulatedAdapter::new();
        let content = RenderedContent {
            subject: Some("Welcome".into()),
            body: "Hello".into(),
        };

        let started = tokio::time::Instant::now();
        let result = adapter
            .send(&ProviderConfig::default(), &notification(), &content)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.external_id.as_deref(), Some("n-1"));
        assert!(started.elapsed() >= DEFAULT_LATENCY);
    }

    #[test]
    fn test_supports_only_simulated() {
        let adapter = SimulatedAdapter::new();
        assert!(adapter.supports(NotificationChannel::Simulated));
        assert!(!adapter.supports(NotificationChannel::Email));
    }
}
