//! Error types shared across the coordination layer

use thiserror::Error;

use crate::identifiers::IdValidationError;
use crate::persistence::PersistenceError;
use crate::transport::TransportError;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by core infrastructure
#[derive(Error, Debug)]
pub enum CoreError {
    /// An identifier failed validation
    #[error("Invalid identifier: {0}")]
    InvalidId(#[from] IdValidationError),

    /// A timer was scheduled outside a tokio runtime
    #[error("No tokio runtime available for scheduling")]
    NoRuntime,

    /// A timer was scheduled after the owning scheduler shut down
    #[error("Scheduler '{0}' has been shut down")]
    SchedulerShutDown(String),

    /// Message delivery failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Snapshot persistence failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}
