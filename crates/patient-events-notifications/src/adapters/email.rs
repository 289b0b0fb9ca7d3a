use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor, message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use tracing::debug;

use super::{NotificationAdapter, RenderedContent, SendResult};
use crate::error::NotificationError;
use crate::provider::ProviderConfig;
use crate::types::{Notification, NotificationChannel};

const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP delivery to the recipient's mailbox.
pub struct EmailAdapter;

impl EmailAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_message(
        config: &ProviderConfig,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<Message, NotificationError> {
        let from = config
            .from
            .as_ref()
            .ok_or_else(|| NotificationError::InvalidConfig("Missing from".into()))?;

        let to = notification
            .recipient
            .email
            .as_ref()
            .ok_or(NotificationError::RecipientNotFound)?;

        let subject = content.subject.as_deref().unwrap_or("Notification");

        Message::builder()
            .from(
                from.parse()
                    .map_err(|e| NotificationError::InvalidConfig(format!("Invalid from: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| NotificationError::SendFailed(format!("Invalid to: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(content.body.clone())
            .map_err(|e| NotificationError::SendFailed(e.to_string()))
    }

    fn build_mailer(
        config: &ProviderConfig,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
        let host = config
            .smtp_host
            .as_ref()
            .ok_or_else(|| NotificationError::InvalidConfig("Missing smtp_host".into()))?;
        let port = config.smtp_port.unwrap_or(DEFAULT_SMTP_PORT);

        let mut builder = if config.smtp_insecure {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?
        }
        .port(port);

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }
}

impl Default for EmailAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationAdapter for EmailAdapter {
    async fn send(
        &self,
        config: &ProviderConfig,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<SendResult, NotificationError> {
        let email = Self::build_message(config, notification, content)?;
        let mailer = Self::build_mailer(config)?;

        match mailer.send(email).await {
            Ok(response) => {
                let reply: String = response.message().collect::<Vec<_>>().join(" ");
                debug!(notification_id = %notification.id, reply = %reply, "SMTP accepted message");
                Ok(SendResult::sent(Some(reply)))
            }
            Err(e) => Ok(SendResult::failed(
                e.to_string(),
                e.is_transient() || e.is_timeout(),
            )),
        }
    }

    fn supports(&self, channel: NotificationChannel) -> bool {
        channel == NotificationChannel::Email
    }
}
