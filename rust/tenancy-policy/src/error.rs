use thiserror::Error;

/// Errors raised while building or rendering a policy document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The bucket or prefix was unusable (for example empty)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The document could not be rendered to or parsed from JSON
    #[error("Failed to serialize/deserialize policy document: {0}")]
    SerializationFailed(String),
}

impl From<serde_json::Error> for PolicyError {
    fn from(error: serde_json::Error) -> Self {
        PolicyError::SerializationFailed(error.to_string())
    }
}
