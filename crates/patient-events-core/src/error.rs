use thiserror::Error;

/// Errors raised while decoding an inbound mutation document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Document is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
}

impl DecodeError {
    /// Create a new MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create a new InvalidField error
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Name of the offending field, if the error is tied to one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::NotAnObject => None,
            Self::MissingField(field) | Self::InvalidField { field, .. } => Some(field),
        }
    }
}

/// Core error types for patient event operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid date/time: {0}")]
    InvalidDateTime(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Time formatting error: {0}")]
    TimeFormat(#[from] time::error::Format),
}

impl CoreError {
    /// Create a new InvalidDateTime error
    pub fn invalid_date_time(datetime: impl Into<String>) -> Self {
        Self::InvalidDateTime(datetime.into())
    }

    /// Create a new UnknownEventType error
    pub fn unknown_event_type(event_type: impl Into<String>) -> Self {
        Self::UnknownEventType(event_type.into())
    }

    /// Check if this error came from decoding an inbound document or message body
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::InvalidDateTime(_) | Self::JsonError(_)
        )
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) | Self::InvalidDateTime(_) => ErrorCategory::Validation,
            Self::UnknownEventType(_) => ErrorCategory::Routing,
            Self::JsonError(_) | Self::TimeFormat(_) => ErrorCategory::Serialization,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Routing,
    Serialization,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Routing => write!(f, "routing"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_error() {
        let err = DecodeError::missing_field("nhsNumber");
        assert_eq!(err.to_string(), "Missing required field: nhsNumber");
        assert_eq!(err.field(), Some("nhsNumber"));

        let core: CoreError = err.into();
        assert!(core.is_decode_error());
        assert_eq!(core.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_invalid_field_error() {
        let err = DecodeError::invalid_field("patientId", "expected integer");
        assert_eq!(
            err.to_string(),
            "Invalid field 'patientId': expected integer"
        );
        assert_eq!(DecodeError::NotAnObject.field(), None);
    }

    #[test]
    fn test_unknown_event_type_is_not_decode_error() {
        let err = CoreError::unknown_event_type("PatientMerged");
        assert_eq!(err.to_string(), "Unknown event type: PatientMerged");
        assert!(!err.is_decode_error());
        assert_eq!(err.category(), ErrorCategory::Routing);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let core_err: CoreError = json_err.into();

        assert!(matches!(core_err, CoreError::JsonError(_)));
        assert!(core_err.is_decode_error());
        assert_eq!(core_err.category(), ErrorCategory::Serialization);
    }

    #[test]
    fn test_error_categories_display() {
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
        assert_eq!(ErrorCategory::Routing.to_string(), "routing");
        assert_eq!(ErrorCategory::Serialization.to_string(), "serialization");
    }
}
