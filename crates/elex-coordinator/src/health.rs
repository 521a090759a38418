//! Aggregate coordinator health

use elex_consensus::Role;
use elex_core::{Category, NodeId};
use elex_observability::{ComponentHealth, SystemHealth};
use serde::{Deserialize, Serialize};

/// Consensus status of one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStatus {
    pub category: Category,
    pub agent_count: usize,
    /// Whether this node leads the category's group
    pub is_leader: bool,
    pub role: Role,
    pub leader: Option<NodeId>,
    pub term: u64,
}

/// Snapshot of a coordinator's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorHealth {
    pub node_id: NodeId,
    pub total_agents: usize,
    /// Agents heard from within the heartbeat timeout
    pub healthy_agents: usize,
    pub categories: Vec<CategoryStatus>,
    /// True when at least one category has an elected leader
    pub consensus_ready: bool,
    pub gossip_entries: usize,
    pub gossip_peers: usize,
    pub gossip_running: bool,
}

impl CoordinatorHealth {
    pub fn unhealthy_agents(&self) -> usize {
        self.total_agents - self.healthy_agents
    }

    /// Per-component view for health endpoints
    pub fn to_system_health(&self) -> SystemHealth {
        let mut components = Vec::with_capacity(self.categories.len() + 2);

        let registry = if self.total_agents > 0 && self.healthy_agents == 0 {
            ComponentHealth::degraded("registry", "no agent heartbeats within timeout")
        } else {
            ComponentHealth::healthy("registry")
        };
        components.push(
            registry
                .with_metadata("total_agents", self.total_agents)
                .with_metadata("healthy_agents", self.healthy_agents),
        );

        for status in &self.categories {
            let name = format!("consensus:{}", status.category);
            let component = if status.leader.is_some() {
                ComponentHealth::healthy(name)
            } else {
                ComponentHealth::degraded(name, "no leader elected")
            };
            components.push(
                component
                    .with_metadata("role", status.role)
                    .with_metadata("term", status.term)
                    .with_metadata("agents", status.agent_count),
            );
        }

        let gossip = if self.gossip_running {
            ComponentHealth::healthy("gossip")
        } else {
            ComponentHealth::degraded("gossip", "periodic rounds not running")
        };
        components.push(
            gossip
                .with_metadata("entries", self.gossip_entries)
                .with_metadata("peers", self.gossip_peers),
        );

        SystemHealth::from_components(components)
    }
}
