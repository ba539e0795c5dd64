use thiserror::Error;

/// Top-level error type for the canon system.
///
/// Each variant corresponds to a subsystem or failure class. The API layer
/// maps variants to HTTP statuses: `Validation` becomes 400, `ClientNotFound`
/// becomes 404, everything else that escapes before streaming begins becomes
/// 500. Failures after the first streamed byte are reported in-band and never
/// surface through this type to the HTTP status.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CanonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for CanonError {
    fn from(err: toml::de::Error) -> Self {
        CanonError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CanonError {
    fn from(err: toml::ser::Error) -> Self {
        CanonError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CanonError {
    fn from(err: serde_json::Error) -> Self {
        CanonError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for canon operations.
pub type Result<T> = std::result::Result<T, CanonError>;
