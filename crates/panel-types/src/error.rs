//! Common error types shared across crates

use thiserror::Error;

/// Common result type
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors shared by the panel crates
#[derive(Error, Debug)]
pub enum CommonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}
