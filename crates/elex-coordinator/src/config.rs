//! Coordinator configuration
//!
//! Loaded from TOML. Only `node_id` and `categories` are required; every
//! other field falls back to its default.
//!
//! ```toml
//! node_id = "coordinator-1"
//! categories = ["energy-saving", "mobility"]
//! max_agents = 500
//! gossip_peers = ["coordinator-2", "coordinator-3"]
//!
//! [peers]
//! energy-saving = ["coordinator-2", "coordinator-3"]
//!
//! [consensus]
//! election_timeout_min_ms = 150
//! election_timeout_max_ms = 300
//! max_log_entries = 1024
//!
//! [router]
//! dimensions = 128
//! index = "graph"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use elex_consensus::ConsensusConfig;
use elex_core::{Category, NodeId};
use elex_gossip::GossipConfig;
use elex_observability::ObservabilityConfig;
use elex_router::RouterConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Default registry capacity
pub const DEFAULT_MAX_AGENTS: usize = 1000;
/// Default window after which an agent without heartbeats counts as unhealthy
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;

fn default_max_agents() -> usize {
    DEFAULT_MAX_AGENTS
}

fn default_heartbeat_timeout_ms() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_MS
}

/// Swarm coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// This coordinator's identity in consensus groups and gossip
    pub node_id: NodeId,
    /// Categories served; one consensus group each
    pub categories: Vec<Category>,
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Bound on how long `propose` waits for a commit
    #[serde(default)]
    pub proposal_timeout_ms: Option<u64>,
    /// Consensus peers per category; a missing entry means a single-node group
    #[serde(default)]
    pub peers: BTreeMap<Category, Vec<NodeId>>,
    /// Initial gossip peers
    #[serde(default)]
    pub gossip_peers: Vec<NodeId>,
    /// Consensus timings shared by every category; `peers` inside is ignored
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub gossip: GossipConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl CoordinatorConfig {
    pub fn new(node_id: NodeId, categories: Vec<Category>) -> Self {
        Self {
            node_id,
            categories,
            max_agents: DEFAULT_MAX_AGENTS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            proposal_timeout_ms: None,
            peers: BTreeMap::new(),
            gossip_peers: Vec::new(),
            consensus: ConsensusConfig::default(),
            gossip: GossipConfig::default(),
            router: RouterConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> CoordinatorResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CoordinatorError::ConfigLoad(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::load_from_toml(&content)
    }

    /// Load configuration from TOML text
    pub fn load_from_toml(content: &str) -> CoordinatorResult<Self> {
        toml::from_str(content)
            .map_err(|e| CoordinatorError::ConfigLoad(format!("failed to parse TOML: {e}")))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn proposal_timeout(&self) -> Option<Duration> {
        self.proposal_timeout_ms.map(Duration::from_millis)
    }

    /// Consensus configuration for one category's group
    pub fn consensus_for(&self, category: &Category) -> ConsensusConfig {
        self.consensus
            .clone()
            .with_peers(self.peers.get(category).cloned().unwrap_or_default())
    }

    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.categories.is_empty() {
            return Err(CoordinatorError::InvalidConfig(
                "at least one category is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category) {
                return Err(CoordinatorError::InvalidConfig(format!(
                    "duplicate category: {category}"
                )));
            }
        }

        if self.max_agents == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "max_agents must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_timeout_ms == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "heartbeat_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.proposal_timeout_ms == Some(0) {
            return Err(CoordinatorError::InvalidConfig(
                "proposal_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(stray) = self.peers.keys().find(|c| !seen.contains(c)) {
            return Err(CoordinatorError::InvalidConfig(format!(
                "peers configured for unknown category: {stray}"
            )));
        }
        if self.gossip_peers.contains(&self.node_id) {
            return Err(CoordinatorError::InvalidConfig(
                "gossip_peers must not contain this node".to_string(),
            ));
        }

        for category in &self.categories {
            self.consensus_for(category).validate(&self.node_id)?;
        }
        self.gossip.validate()?;
        self.router.validate()?;
        Ok(())
    }
}
