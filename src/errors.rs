/// Domain-specific error types for scholarnet
///
/// Only failures the caller can act on live here. Semantic-channel and cache
/// failures have their own error types and are absorbed on the search path;
/// vector sync surfaces semantic failures as `Semantic`.

#[derive(Debug, thiserror::Error)]
pub enum ScholarError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Paper not found: {id}")]
    NotFound {
        id: String
    },

    #[error("Lexical index has not been built yet")]
    IndexNotReady,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Semantic backend error: {0}")]
    Semantic(String),
}

impl From<crate::semantic::SemanticError> for ScholarError {
    fn from(e: crate::semantic::SemanticError) -> Self {
        ScholarError::Semantic(e.to_string())
    }
}

impl From<sqlx::Error> for ScholarError {
    fn from(e: sqlx::Error) -> Self {
        ScholarError::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ScholarError {
    fn from(e: tokio::task::JoinError) -> Self {
        ScholarError::Internal(format!("Background task failed: {}", e))
    }
}

impl ScholarError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use scholarnet::errors::ScholarError;
    /// let err = ScholarError::validation("size", "size must be between 1 and 100");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        ScholarError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }
}
