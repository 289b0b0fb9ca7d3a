use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde_json::json;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{NotificationAdapter, RenderedContent, SendResult};
use crate::error::NotificationError;
use crate::provider::ProviderConfig;
use crate::types::{Notification, NotificationChannel};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature-256";

pub struct WebhookAdapter {
    http_client: Client,
}

impl WebhookAdapter {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }
}

impl Default for WebhookAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign_payload(payload: &str, secret: &str) -> Result<String, NotificationError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotificationError::InvalidConfig(format!("Invalid webhook secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl NotificationAdapter for WebhookAdapter {
    async fn send(
        &self,
        config: &ProviderConfig,
        notification: &Notification,
        content: &RenderedContent,
    ) -> Result<SendResult, NotificationError> {
        let url = notification
            .recipient
            .webhook_url
            .as_ref()
            .or(config.webhook_url.as_ref())
            .ok_or_else(|| NotificationError::InvalidConfig("Missing webhook_url".into()))?;

        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| NotificationError::Internal(e.to_string()))?;

        let payload = json!({
            "notification_id": notification.id,
            "channel": notification.channel,
            "template_id": notification.template_id,
            "recipient": notification.recipient,
            "content": {
                "subject": content.subject,
                "body": content.body
            },
            "data": notification.template_data,
            "event_id": notification.event_id,
            "timestamp": timestamp
        });

        let payload_str = serde_json::to_string(&payload)
            .map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        let mut request = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json");

        if let Some(headers) = &config.webhook_headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        if let Some(secret) = &config.webhook_secret {
            let signature = sign_payload(&payload_str, secret)?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let response = match request.body(payload_str).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return Err(NotificationError::Unavailable(e.to_string()));
            }
            Err(e) => return Err(NotificationError::SendFailed(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(SendResult::sent(None));
        }

        let body = response.text().await.unwrap_or_default();
        Ok(SendResult::failed(
            format!("Webhook failed ({status}): {body}"),
            is_retryable_status(status),
        ))
    }

    fn supports(&self, channel: NotificationChannel) -> bool {
        channel == NotificationChannel::Webhook
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_signature() {
        let signature = sign_payload(r#"{"test": "data"}"#, "secret123").unwrap();
        assert_eq!(signature.len(), 64);
        let signature2 = sign_payload(r#"{"test": "data"}"#, "secret123").unwrap();
        assert_eq!(signature, signature2);
        let other = sign_payload(r#"{"test": "data"}"#, "other").unwrap();
        assert_ne!(signature, other);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }
}
