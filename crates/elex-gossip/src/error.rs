//! Gossip error types

use elex_core::CoreError;
use thiserror::Error;

/// Result type for gossip operations
pub type GossipResult<T> = Result<T, GossipError>;

/// Errors that can occur in the gossip store
#[derive(Error, Debug)]
pub enum GossipError {
    /// A new key would exceed the configured entry limit
    #[error("Gossip store full: {max} entries")]
    CapacityExceeded { max: usize },

    /// Keys must be non-empty
    #[error("Gossip key cannot be empty")]
    EmptyKey,

    /// Configuration failed validation
    #[error("Invalid gossip configuration: {0}")]
    InvalidConfig(String),

    /// The store has been stopped
    #[error("Gossip store stopped")]
    Stopped,

    /// Scheduling failure
    #[error(transparent)]
    Core(#[from] CoreError),
}
