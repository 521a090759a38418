//! Multi-node clusters over a [`LocalNetwork`]

use std::sync::Mutex;
use std::time::Duration;

use elex_consensus::{ConsensusConfig, ConsensusEnvelope, ConsensusGroup, ConsensusResult};
use elex_core::sync::lock_or_recover;
use elex_core::{Category, NodeId};
use elex_gossip::{GossipConfig, GossipPush, GossipResult, GossipStore};
use tokio::task::JoinHandle;

use crate::fixtures::node_id;
use crate::network::LocalNetwork;

/// Consensus groups for one category, one per node
pub struct ConsensusCluster {
    groups: Vec<ConsensusGroup>,
    network: LocalNetwork<ConsensusEnvelope>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConsensusCluster {
    /// Build `size` groups named `node-0..` with `config`'s timings
    pub fn new(category: Category, size: usize, config: ConsensusConfig) -> ConsensusResult<Self> {
        let network = LocalNetwork::new();
        let ids: Vec<NodeId> = (0..size).map(node_id).collect();

        let mut groups = Vec::with_capacity(size);
        for (index, id) in ids.iter().enumerate() {
            let peers = ids.iter().filter(|peer| *peer != id).cloned().collect();
            let group = ConsensusGroup::builder(
                id.clone(),
                category.clone(),
                config.clone().with_peers(peers),
            )
            .transport(network.transport(id.clone()))
            .rng_seed(index as u64 + 1)
            .build()?;

            let receiver = group.clone();
            network.register(id.clone(), move |envelope: ConsensusEnvelope| {
                receiver.handle_message(&envelope.from, envelope.message);
            });
            groups.push(group);
        }

        Ok(Self {
            groups,
            network,
            pump: Mutex::new(None),
        })
    }

    pub fn groups(&self) -> &[ConsensusGroup] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> &ConsensusGroup {
        &self.groups[index]
    }

    pub fn network(&self) -> &LocalNetwork<ConsensusEnvelope> {
        &self.network
    }

    /// Start every group and the delivery pump
    pub fn start(&self) -> ConsensusResult<()> {
        let mut pump = lock_or_recover(&self.pump, "cluster pump");
        if pump.is_none() {
            *pump = Some(self.network.spawn_pump());
        }
        drop(pump);

        for group in &self.groups {
            group.start()?;
        }
        Ok(())
    }

    pub fn stop(&self) {
        for group in &self.groups {
            group.stop();
        }
        if let Some(pump) = lock_or_recover(&self.pump, "cluster pump").take() {
            pump.abort();
        }
    }

    /// Groups currently claiming leadership, any term
    pub fn leaders(&self) -> Vec<&ConsensusGroup> {
        self.groups.iter().filter(|g| g.is_leader()).collect()
    }

    /// Poll until a leader is known to every running group
    pub async fn wait_for_leader(&self, within: Duration) -> Option<ConsensusGroup> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if let Some(leader) = self.agreed_leader() {
                return Some(leader);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn agreed_leader(&self) -> Option<ConsensusGroup> {
        let leader = self
            .groups
            .iter()
            .filter(|g| g.is_running())
            .max_by_key(|g| (g.is_leader(), g.current_term()))
            .filter(|g| g.is_leader())?;
        let id = leader.id();
        let agreed = self
            .groups
            .iter()
            .filter(|g| g.is_running())
            .all(|g| g.leader().as_ref() == Some(&id) && g.current_term() == leader.current_term());
        agreed.then(|| leader.clone())
    }
}

impl Drop for ConsensusCluster {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fully meshed gossip stores, one per node
pub struct GossipCluster {
    stores: Vec<GossipStore>,
    network: LocalNetwork<GossipPush>,
}

impl GossipCluster {
    pub fn new(size: usize, config: GossipConfig) -> GossipResult<Self> {
        let network = LocalNetwork::new();
        let ids: Vec<NodeId> = (0..size).map(node_id).collect();

        let mut stores = Vec::with_capacity(size);
        for (index, id) in ids.iter().enumerate() {
            let store = GossipStore::builder(id.clone(), config.clone())
                .transport(network.transport(id.clone()))
                .rng_seed(index as u64 + 1)
                .build()?;
            for peer in ids.iter().filter(|peer| *peer != id) {
                store.add_peer(peer.clone());
            }

            let receiver = store.clone();
            network.register(id.clone(), move |push: GossipPush| {
                receiver.handle_push(push);
            });
            stores.push(store);
        }

        Ok(Self { stores, network })
    }

    pub fn stores(&self) -> &[GossipStore] {
        &self.stores
    }

    pub fn store(&self, index: usize) -> &GossipStore {
        &self.stores[index]
    }

    pub fn network(&self) -> &LocalNetwork<GossipPush> {
        &self.network
    }

    /// Run one round on every store and deliver the resulting pushes
    pub fn run_round(&self) -> usize {
        for store in &self.stores {
            store.gossip_round();
        }
        self.network.deliver_all()
    }

    /// Run rounds until nothing is left to push, at most `max_rounds`
    pub fn run_until_quiet(&self, max_rounds: usize) -> usize {
        for round in 1..=max_rounds {
            if self.run_round() == 0 {
                return round;
            }
        }
        max_rounds
    }

    /// Whether every store holds `key` at the same version
    pub fn converged_on(&self, key: &str) -> bool {
        let versions: Vec<Option<u64>> = self
            .stores
            .iter()
            .map(|store| store.get(key).map(|entry| entry.version))
            .collect();
        versions[0].is_some() && versions.iter().all(|v| *v == versions[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::category;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_three_node_cluster_elects_one_leader() {
        let cluster = ConsensusCluster::new(category("energy"), 3, ConsensusConfig::default()).unwrap();
        cluster.start().unwrap();

        let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();
        assert_eq!(cluster.leaders().len(), 1);
        assert!(leader.current_term() >= 1);
        cluster.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cluster_replicates_proposals() {
        let cluster = ConsensusCluster::new(category("energy"), 3, ConsensusConfig::default()).unwrap();
        cluster.start().unwrap();
        let leader = cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();

        leader
            .propose(elex_consensus::Command::set("threshold", json!(0.4)))
            .await
            .unwrap();

        // Followers learn the commit index on the next heartbeat
        tokio::time::sleep(Duration::from_millis(200)).await;
        for group in cluster.groups() {
            assert_eq!(group.get("threshold"), Some(json!(0.4)));
        }
        cluster.stop();
    }

    #[test]
    fn test_gossip_cluster_converges() {
        let cluster = GossipCluster::new(5, GossipConfig::default()).unwrap();
        cluster.store(0).spread("x", json!(1), None).unwrap();

        cluster.run_until_quiet(10);
        assert!(cluster.converged_on("x"));
        assert!(cluster.stores().iter().all(|s| s.get("x").unwrap().value == json!(1)));
    }
}
