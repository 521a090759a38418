//! Consensus timing configuration

use std::time::Duration;

use elex_core::NodeId;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, ConsensusResult};

/// Configuration of one consensus group member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Lower bound of the randomized election timeout
    pub election_timeout_min_ms: u64,
    /// Upper bound (inclusive) of the randomized election timeout
    pub election_timeout_max_ms: u64,
    /// Leader heartbeat period
    pub heartbeat_interval_ms: u64,
    /// Other members of the group, excluding this node
    pub peers: Vec<NodeId>,
    /// Retained log entries above which applied entries are compacted
    pub max_log_entries: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            peers: Vec::new(),
            max_log_entries: 1024,
        }
    }
}

impl ConsensusConfig {
    /// Set the peer list
    pub fn with_peers(mut self, peers: Vec<NodeId>) -> Self {
        self.peers = peers;
        self
    }

    /// Heartbeat interval as a duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Draw an election timeout uniformly from the configured range
    pub fn random_election_timeout<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let ms = rng.random_range(self.election_timeout_min_ms..=self.election_timeout_max_ms);
        Duration::from_millis(ms)
    }

    /// Total group size including this node
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Votes or acknowledgements needed for a majority, `floor(n/2) + 1`
    pub fn quorum(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Validate timing bounds and peer list
    pub fn validate(&self, own_id: &NodeId) -> ConsensusResult<()> {
        if self.election_timeout_min_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "election_timeout_min_ms must be greater than 0".to_string(),
            ));
        }
        if self.election_timeout_max_ms < self.election_timeout_min_ms {
            return Err(ConsensusError::InvalidConfig(format!(
                "election_timeout_max_ms ({}) must be >= election_timeout_min_ms ({})",
                self.election_timeout_max_ms, self.election_timeout_min_ms
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(ConsensusError::InvalidConfig(format!(
                "heartbeat_interval_ms ({}) must be below election_timeout_min_ms ({})",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.max_log_entries == 0 {
            return Err(ConsensusError::InvalidConfig(
                "max_log_entries must be greater than 0".to_string(),
            ));
        }
        if self.peers.contains(own_id) {
            return Err(ConsensusError::InvalidConfig(format!(
                "peer list contains the local node '{own_id}'"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = self.peers.iter().find(|peer| !seen.insert(*peer)) {
            return Err(ConsensusError::InvalidConfig(format!(
                "duplicate peer '{duplicate}'"
            )));
        }
        Ok(())
    }
}
