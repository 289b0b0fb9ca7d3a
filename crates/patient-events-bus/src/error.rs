//! Transport error types.

use std::fmt;

/// Errors raised by the bus, its clients and the connection pool.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Subscription not found: {topic}/{subscription}")]
    SubscriptionNotFound { topic: String, subscription: String },

    /// The message lock expired or was already settled.
    #[error("Message lock lost: {0}")]
    LockLost(String),

    /// The connection broke mid-operation.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The service refused the request for now (throttling, outage).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

impl TransportError {
    pub fn subscription_not_found(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self::SubscriptionNotFound {
            topic: topic.into(),
            subscription: subscription.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Returns `true` if the same operation may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Unavailable(_) | Self::Pool(_)
        )
    }

    /// Returns `true` if the connection that produced this error should be discarded.
    pub fn is_connection_broken(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockLost(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TopicNotFound(_) | Self::SubscriptionNotFound { .. } => ErrorCategory::NotFound,
            Self::LockLost(_) => ErrorCategory::Settlement,
            Self::Connection(_) | Self::Unavailable(_) | Self::Pool(_) => {
                ErrorCategory::Infrastructure
            }
            Self::Encode(_) => ErrorCategory::Serialization,
        }
    }
}

impl From<patient_events_core::CoreError> for TransportError {
    fn from(err: patient_events_core::CoreError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl<E: fmt::Display> From<deadpool::managed::PoolError<E>> for TransportError {
    fn from(err: deadpool::managed::PoolError<E>) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Transport error categories for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Settlement,
    Infrastructure,
    Serialization,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Settlement => write!(f, "settlement"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}
