//! Router error types

use thiserror::Error;

/// Result type for routing operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors that can occur while indexing or routing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    /// Embedding length differs from the configured dimensions
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding contains NaN or infinite components
    #[error("Embedding contains non-finite value at position {position}")]
    NonFiniteComponent { position: usize },

    /// Configuration failed validation
    #[error("Invalid router configuration: {0}")]
    InvalidConfig(String),
}
