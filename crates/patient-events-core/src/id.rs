use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Event id must not be empty")]
    Empty,
    #[error("Invalid event id '{0}'")]
    Invalid(String),
}

/// Generate a fresh event id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate an event id received from the wire.
///
/// Event ids are UUIDs; anything else is rejected.
pub fn validate_id(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| IdError::Invalid(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_and_valid() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(validate_id(&a).is_ok());
    }

    #[test]
    fn test_validate_id_rejects_garbage() {
        assert_eq!(validate_id(""), Err(IdError::Empty));
        assert_eq!(
            validate_id("not-a-uuid"),
            Err(IdError::Invalid("not-a-uuid".to_string()))
        );
    }
}
