use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Delivery credentials and endpoints for the notification adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Sender address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    // Email (SMTP)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_password: Option<String>,

    /// Plain SMTP without TLS (local relays and test servers only)
    pub smtp_insecure: bool,

    // Webhook
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_headers: Option<HashMap<String, String>>,
}

/// Mask secrets for logging
pub fn mask_secrets(mut config: ProviderConfig) -> ProviderConfig {
    if config.smtp_password.is_some() {
        config.smtp_password = Some("***".to_string());
    }
    if config.webhook_secret.is_some() {
        config.webhook_secret = Some("***".to_string());
    }
    config
}
