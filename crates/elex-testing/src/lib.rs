//! # ELEX Testing
//!
//! Test support for the coordination layer: an in-memory network with
//! partitions and delivery control, deterministic embedding fixtures, and
//! helpers that wire several consensus groups or gossip stores together.

pub mod cluster;
pub mod fixtures;
pub mod network;

pub use cluster::{ConsensusCluster, GossipCluster};
pub use fixtures::{
    DEFAULT_DIMENSIONS, agent_id, axis_embedding, blend, category, faj_code, node_id,
    seeded_embeddings,
};
pub use network::{Handler, LocalNetwork, NetworkStats};
