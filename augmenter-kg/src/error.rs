//! Error types for evidence graph operations

use thiserror::Error;

/// Main error type for graph operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KgError {
    /// Referenced entity is not present in the store
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Invalid chain or store configuration
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for graph operations
pub type Result<T> = std::result::Result<T, KgError>;

impl From<String> for KgError {
    fn from(s: String) -> Self {
        KgError::Other(s)
    }
}

impl From<&str> for KgError {
    fn from(s: &str) -> Self {
        KgError::Other(s.to_string())
    }
}
