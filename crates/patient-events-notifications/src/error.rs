use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The provider could not be reached or asked us to back off.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Recipient not found")]
    RecipientNotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Returns `true` if sending again later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
