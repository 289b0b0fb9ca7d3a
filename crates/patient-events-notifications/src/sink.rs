use std::collections::HashMap;
use std::sync::Arc;

use patient_events_core::{DomainEvent, datetime::format_rfc3339, id::generate_id};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::adapters::NotificationAdapter;
use crate::error::NotificationError;
use crate::provider::ProviderConfig;
use crate::templates::{CLOSURE_TEMPLATE, TemplateRenderer, UPDATED_TEMPLATE, WELCOME_TEMPLATE};
use crate::types::{Notification, NotificationChannel, NotificationRecipient};

/// Maps GP practices to the mailbox that receives patient notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipientDirectory {
    pub practice_mailboxes: HashMap<String, String>,
    pub default_mailbox: Option<String>,
}

impl RecipientDirectory {
    pub fn mailbox_for(&self, gp_practice: &str) -> Option<&str> {
        self.practice_mailboxes
            .get(gp_practice)
            .or(self.default_mailbox.as_ref())
            .map(String::as_str)
    }
}

/// Composes one notification per patient event and hands it to an adapter.
///
/// Nothing is persisted; a failed dispatch is returned to the caller.
pub struct NotificationSink {
    adapter: Arc<dyn NotificationAdapter>,
    provider: ProviderConfig,
    renderer: TemplateRenderer,
    channel: NotificationChannel,
    directory: RecipientDirectory,
}

impl NotificationSink {
    pub fn new(
        adapter: Arc<dyn NotificationAdapter>,
        channel: NotificationChannel,
        provider: ProviderConfig,
    ) -> Result<Self, NotificationError> {
        if !adapter.supports(channel) {
            return Err(NotificationError::InvalidConfig(format!(
                "adapter does not support channel '{channel}'"
            )));
        }
        Ok(Self {
            adapter,
            provider,
            renderer: TemplateRenderer::with_defaults(),
            channel,
            directory: RecipientDirectory::default(),
        })
    }

    pub fn with_renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_directory(mut self, directory: RecipientDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn channel(&self) -> NotificationChannel {
        self.channel
    }

    /// Dispatch the welcome, update or closure notice for `event`.
    pub async fn notify(&self, event: &DomainEvent) -> Result<(), NotificationError> {
        let template_id = match event {
            DomainEvent::Created(e) => {
                info!(patient_id = e.patient_id, "Sending welcome email to patient: {}", e.name);
                WELCOME_TEMPLATE
            }
            DomainEvent::Updated(e) => {
                info!(
                    patient_id = e.patient_id,
                    "Sending update notification to patient: {}", e.name
                );
                UPDATED_TEMPLATE
            }
            DomainEvent::Deleted(e) => {
                info!(
                    patient_id = e.patient_id,
                    "Sending account closure notification to patient: {}", e.name
                );
                CLOSURE_TEMPLATE
            }
        };

        let notification = self.compose(event, template_id)?;
        let content = self
            .renderer
            .render(&notification.template_id, &notification.template_data)?;

        let external_id = self
            .adapter
            .send(&self.provider, &notification, &content)
            .await?
            .into_result()?;

        debug!(
            notification_id = %notification.id,
            event_id = %notification.event_id,
            channel = %self.channel,
            external_id = external_id.as_deref().unwrap_or(""),
            "notification dispatched"
        );
        Ok(())
    }

    fn compose(
        &self,
        event: &DomainEvent,
        template_id: &str,
    ) -> Result<Notification, NotificationError> {
        let timestamp = format_rfc3339(&event.timestamp())
            .map_err(|e| NotificationError::Internal(e.to_string()))?;

        let mut data = HashMap::new();
        data.insert("name".to_string(), Value::from(event.name()));
        data.insert("nhs_number".to_string(), Value::from(event.nhs_number()));
        data.insert("gp_practice".to_string(), Value::from(event.gp_practice()));
        data.insert("patient_id".to_string(), Value::from(event.patient_id()));
        data.insert("event_type".to_string(), Value::from(event.event_type().as_str()));
        data.insert("timestamp".to_string(), Value::from(timestamp));

        let email = match self.channel {
            NotificationChannel::Email => Some(
                self.directory
                    .mailbox_for(event.gp_practice())
                    .ok_or(NotificationError::RecipientNotFound)?
                    .to_string(),
            ),
            _ => self
                .directory
                .mailbox_for(event.gp_practice())
                .map(str::to_string),
        };

        Ok(Notification {
            id: generate_id(),
            channel: self.channel,
            recipient: NotificationRecipient {
                reference: format!("Patient/{}", event.patient_id()),
                name: Some(event.name().to_string()),
                email,
                webhook_url: None,
            },
            template_id: template_id.to_string(),
            template_data: data,
            event_id: event.event_id().to_string(),
            created_at: OffsetDateTime::now_utc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{RenderedContent, SendResult, SimulatedAdapter};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use time::macros::{date, datetime};

    #[derive(Default)]
    struct RecordingAdapter {
        sent: Mutex<Vec<(Notification, RenderedContent)>>,
        fail_with: Option<SendResult>,
    }

    #[async_trait]
    impl NotificationAdapter for RecordingAdapter {
        async fn send(
            &self,
            _config: &ProviderConfig,
            notification: &Notification,
            content: &RenderedContent,
        ) -> Result<SendResult, NotificationError> {
            self.sent
                .lock()
                .unwrap()
                .push((notification.clone(), content.clone()));
            match &self.fail_with {
                Some(r) => Ok(SendResult::failed(r.error.clone().unwrap_or_default(), r.retryable)),
                None => Ok(SendResult::sent(None)),
            }
        }

        fn supports(&self, _channel: NotificationChannel) -> bool {
            true
        }
    }

    fn created() -> DomainEvent {
        DomainEvent::created(
            1,
            "485 777 3456",
            "Sarah Johnson",
            date!(1985 - 03 - 15),
            "North Medical Centre",
            datetime!(2024-01-15 10:30:00 UTC),
        )
    }

    #[tokio::test]
    async fn test_created_sends_welcome() {
        let adapter = Arc::new(RecordingAdapter::default());
        let sink = NotificationSink::new(
            adapter.clone(),
            NotificationChannel::Simulated,
            ProviderConfig::default(),
        )
        .unwrap();

        sink.notify(&created()).await.unwrap();

        let sent = adapter.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (notification, content) = &sent[0];
        assert_eq!(notification.template_id, WELCOME_TEMPLATE);
        assert_eq!(notification.recipient.reference, "Patient/1");
        assert_eq!(
            content.subject.as_deref(),
            Some("Welcome to North Medical Centre")
        );
        assert!(content.body.contains("Dear Sarah Johnson"));
        assert!(content.body.contains("485 777 3456"));
    }

    #[tokio::test]
    async fn test_deleted_sends_closure_notice() {
        let adapter = Arc::new(RecordingAdapter::default());
        let sink = NotificationSink::new(
            adapter.clone(),
            NotificationChannel::Simulated,
            ProviderConfig::default(),
        )
        .unwrap();

        let event = DomainEvent::deleted(
            7,
            "943 476 5919",
            "Tom Baker",
            "Riverside Surgery",
            datetime!(2024-02-01 09:00:00 UTC),
        );
        sink.notify(&event).await.unwrap();

        let sent = adapter.sent.lock().unwrap();
        assert_eq!(sent[0].0.template_id, CLOSURE_TEMPLATE);
        assert!(sent[0].1.body.contains("2024-02-01T09:00:00Z"));
    }

    #[tokio::test]
    async fn test_failures_propagate_with_retryability() {
        let adapter = Arc::new(RecordingAdapter {
            fail_with: Some(SendResult::failed("421 busy", true)),
            ..Default::default()
        });
        let sink =
            NotificationSink::new(adapter, NotificationChannel::Simulated, Default::default())
                .unwrap();
        let err = sink.notify(&created()).await.unwrap_err();
        assert!(err.is_transient());

        let adapter = Arc::new(RecordingAdapter {
            fail_with: Some(SendResult::failed("550 no such user", false)),
            ..Default::default()
        });
        let sink =
            NotificationSink::new(adapter, NotificationChannel::Simulated, Default::default())
                .unwrap();
        let err = sink.notify(&created()).await.unwrap_err();
        assert!(matches!(err, NotificationError::SendFailed(_)));
    }

    #[tokio::test]
    async fn test_email_channel_requires_mailbox() {
        let adapter = Arc::new(RecordingAdapter::default());
        let sink = NotificationSink::new(
            adapter.clone(),
            NotificationChannel::Email,
            ProviderConfig::default(),
        )
        .unwrap();
        let err = sink.notify(&created()).await.unwrap_err();
        assert!(matches!(err, NotificationError::RecipientNotFound));

        let mut directory = RecipientDirectory::default();
        directory.practice_mailboxes.insert(
            "North Medical Centre".into(),
            "north.medical@example.nhs.uk".into(),
        );
        let sink = NotificationSink::new(
            adapter.clone(),
            NotificationChannel::Email,
            ProviderConfig::default(),
        )
        .unwrap()
        .with_directory(directory);
        sink.notify(&created()).await.unwrap();

        let sent = adapter.sent.lock().unwrap();
        assert_eq!(
            sent[0].0.recipient.email.as_deref(),
            Some("north.medical@example.nhs.uk")
        );
    }

    #[test]
    fn test_rejects_unsupported_channel() {
        let result = NotificationSink::new(
            Arc::new(SimulatedAdapter::with_latency(Duration::ZERO)),
            NotificationChannel::Webhook,
            ProviderConfig::default(),
        );
        assert!(matches!(result, Err(NotificationError::InvalidConfig(_))));
    }

    #[test]
    fn test_directory_falls_back_to_default() {
        let directory = RecipientDirectory {
            practice_mailboxes: HashMap::from([("A".to_string(), "a@example.nhs.uk".to_string())]),
            default_mailbox: Some("all@example.nhs.uk".into()),
        };
        assert_eq!(directory.mailbox_for("A"), Some("a@example.nhs.uk"));
        assert_eq!(directory.mailbox_for("B"), Some("all@example.nhs.uk"));
    }
}
