//! Coordinator error types

use elex_consensus::ConsensusError;
use elex_core::{AgentId, Category, CoreError};
use elex_gossip::GossipError;
use elex_observability::MetricsError;
use elex_router::RouterError;
use thiserror::Error;

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors surfaced by the swarm coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// The registry already holds `max` agents
    #[error("Agent capacity reached: {max} agents registered")]
    Capacity { max: usize },

    #[error("Unknown category: {0}")]
    UnknownCategory(Category),

    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// A routing query arrived without an embedding
    #[error("Query carries no embedding")]
    MissingEmbedding,

    #[error("Invalid coordinator configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    /// No commit within the configured proposal timeout
    #[error("Proposal in {category} not committed within {timeout_ms}ms")]
    ProposalTimeout { category: Category, timeout_ms: u64 },

    #[error("Coordinator has been shut down")]
    ShutDown,

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Gossip(#[from] GossipError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

impl CoordinatorError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::Capacity { .. } | CoordinatorError::ProposalTimeout { .. } => true,
            CoordinatorError::Consensus(e) => e.is_retryable(),
            _ => false,
        }
    }
}
