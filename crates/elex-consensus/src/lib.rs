//! # ELEX Consensus
//!
//! Raft-style replication of a small key/value command log for one
//! category's coordinators.
//!
//! The protocol lives in the synchronous [`RaftNode`]; [`ConsensusGroup`]
//! drives it with cancellable timers, hands its RPCs to a
//! [`Transport`](elex_core::Transport) and persists durable state through a
//! [`SnapshotStore`](elex_core::SnapshotStore).
//!
//! ```rust,no_run
//! use elex_consensus::{Command, ConsensusConfig, ConsensusGroup};
//! use elex_core::{Category, NodeId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let group = ConsensusGroup::builder(
//!     NodeId::parse("coordinator-1")?,
//!     Category::parse("energy-saving")?,
//!     ConsensusConfig::default(),
//! )
//! .build()?;
//!
//! // No peers: the group elects itself on start
//! group.start()?;
//! group.propose(Command::set("sleep_threshold", 0.2)).await?;
//! assert!(group.get("sleep_threshold").is_some());
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod group;
pub mod log;
pub mod messages;
pub mod node;
pub mod state_machine;

pub use command::Command;
pub use config::ConsensusConfig;
pub use error::{ConsensusError, ConsensusResult};
pub use group::{ConsensusGroup, ConsensusGroupBuilder, SharedSnapshotStore};
pub use log::{ConsensusLog, LogEntry};
pub use messages::{
    AppendEntries, AppendEntriesResponse, ConsensusEnvelope, ConsensusMessage, InstallSnapshot,
    Outbound, RequestVote, RequestVoteResponse,
};
pub use node::{ConsensusSnapshot, ConsensusStats, RaftNode, Role, Step};
pub use state_machine::KvStateMachine;
