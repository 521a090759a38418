//! Consensus error types

use elex_core::{CoreError, NodeId, PersistenceError};
use thiserror::Error;

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Errors that can occur in a consensus group
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Proposal submitted to a non-leader
    #[error("Not the leader (known leader: {})", .leader.as_ref().map_or("none", NodeId::as_str))]
    NotLeader { leader: Option<NodeId> },

    /// The leader stepped down before the entry committed
    #[error("Leadership lost before entry {index} committed")]
    LeadershipLost { index: u64 },

    /// The group has been stopped
    #[error("Consensus group stopped")]
    Stopped,

    /// Command failed validation
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration failed validation
    #[error("Invalid consensus configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot violates log invariants
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Scheduling or identifier failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Snapshot store failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl ConsensusError {
    /// Whether resubmitting to the current leader may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConsensusError::NotLeader { .. } | ConsensusError::LeadershipLost { .. }
        )
    }
}
