use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Notification channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    /// Log the message after a fixed delay; nothing leaves the process
    #[default]
    Simulated,
    Email,
    Webhook,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Email => "email",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification ready to be handed to an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub channel: NotificationChannel,

    pub recipient: NotificationRecipient,

    pub template_id: String,

    /// Template data for rendering
    pub template_data: HashMap<String, serde_json::Value>,

    /// Event that triggered this notification
    pub event_id: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Notification recipient
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationRecipient {
    /// Patient reference (e.g., "Patient/123")
    pub reference: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Mailbox the message is delivered to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Webhook URL override (for webhook channel)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}
