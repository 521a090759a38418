//! # ELEX
//!
//! Coordination layer for a swarm of feature agents. Each category's
//! coordinators share strongly consistent state through a Raft-style
//! [`consensus`] group, the agent population exchanges presence and learned
//! parameters through epidemic [`gossip`], and incoming requests reach the
//! best-matching agents through the cosine-similarity [`router`]. The
//! [`coordinator`] composes the three behind one API.
//!
//! The member crates are re-exported under short module names; the most
//! used types are also available at the root.

pub use elex_consensus as consensus;
pub use elex_coordinator as coordinator;
pub use elex_core as core;
pub use elex_gossip as gossip;
pub use elex_observability as observability;
pub use elex_router as router;

pub use elex_consensus::{Command, ConsensusConfig, ConsensusGroup};
pub use elex_coordinator::{
    CoordinatorConfig, CoordinatorContext, CoordinatorError, CoordinatorHealth, RoutingQuery,
    SwarmCoordinator,
};
pub use elex_core::{AgentId, Category, FajCode, NodeId};
pub use elex_gossip::{GossipConfig, GossipStore};
pub use elex_router::{RoutedCandidate, RouterConfig, SimilarityRouter};
