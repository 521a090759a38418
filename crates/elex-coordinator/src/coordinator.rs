//! The swarm coordinator
//!
//! [`SwarmCoordinator`] owns the authoritative agent registry and is the
//! only writer to the consensus groups, the gossip store and the similarity
//! router. Every write applies to local state first and only then announces
//! over gossip, so local reads always see the latest local write and a
//! delivery failure only delays convergence elsewhere.
//!
//! Registry writes and their presence announcements run under one write
//! path lock, so gossip versions for an agent follow the order of the local
//! writes. Lock order is write path, then swarm state, then the gossip
//! store's own lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use elex_consensus::{Command, ConsensusGroup, ConsensusMessage, ConsensusEnvelope};
use elex_core::sync::{lock_or_recover, read_or_recover, write_or_recover};
use elex_core::{AgentId, Category, FajCode, NodeId};
use elex_gossip::{GossipPush, GossipStore};
use elex_observability::{CoordinationMetrics, RejectionReason, SystemHealth};
use elex_router::{RoutedCandidate, RouterStats, SimilarityRouter};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::context::CoordinatorContext;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::health::{CategoryStatus, CoordinatorHealth};
use crate::registry::{AgentRecord, AgentRegistry};

/// Default number of candidates returned by a routing query
pub const DEFAULT_TOP_K: usize = 5;

/// Gossip key announcing an agent's presence
pub fn presence_key(agent_id: &AgentId) -> String {
    format!("agent:{agent_id}")
}

/// An incoming request to be routed to agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingQuery {
    /// Query embedding; routing fails without one
    pub embedding: Option<Vec<f32>>,
    pub top_k: usize,
}

impl RoutingQuery {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding: Some(embedding),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    ShutDown,
}

struct SwarmState {
    registry: AgentRegistry,
    router: SimilarityRouter,
}

/// Composition point for consensus, gossip and routing
pub struct SwarmCoordinator {
    config: CoordinatorConfig,
    context: CoordinatorContext,
    groups: BTreeMap<Category, ConsensusGroup>,
    gossip: GossipStore,
    state: RwLock<SwarmState>,
    // Held from a registry write until its announcement is spread
    write_path: Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
    // Elections already exported to metrics, per category
    elections_exported: Mutex<HashMap<Category, u64>>,
}

impl SwarmCoordinator {
    /// Validate `config` and build every component; nothing starts yet
    pub fn new(config: CoordinatorConfig, context: CoordinatorContext) -> CoordinatorResult<Self> {
        config.validate()?;

        let router = SimilarityRouter::new(config.router.clone())?;

        let mut groups = BTreeMap::new();
        for category in &config.categories {
            let mut builder = ConsensusGroup::builder(
                config.node_id.clone(),
                category.clone(),
                config.consensus_for(category),
            )
            .transport(context.consensus_transport.clone())
            .clock(context.clock.clone());
            if let Some(stores) = &context.snapshot_stores {
                builder = builder.snapshot_store(stores(category));
            }
            groups.insert(category.clone(), builder.build()?);
        }

        let gossip = GossipStore::builder(config.node_id.clone(), config.gossip.clone())
            .transport(context.gossip_transport.clone())
            .clock(context.clock.clone())
            .build()?;
        for peer in &config.gossip_peers {
            gossip.add_peer(peer.clone());
        }

        info!(
            node = %config.node_id,
            categories = config.categories.len(),
            max_agents = config.max_agents,
            index = router.index_kind(),
            "Swarm coordinator created"
        );

        Ok(Self {
            config,
            context,
            groups,
            gossip,
            state: RwLock::new(SwarmState {
                registry: AgentRegistry::new(),
                router,
            }),
            write_path: Mutex::new(()),
            lifecycle: Mutex::new(Lifecycle::Created),
            elections_exported: Mutex::new(HashMap::new()),
        })
    }

    /// Start every consensus group and the gossip rounds
    ///
    /// Groups without peers elect themselves immediately. Idempotent while
    /// running; fails after [`shutdown`](Self::shutdown).
    pub fn initialize(&self) -> CoordinatorResult<()> {
        let mut lifecycle = lock_or_recover(&self.lifecycle, "coordinator lifecycle");
        match *lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::ShutDown => return Err(CoordinatorError::ShutDown),
            Lifecycle::Created => {}
        }

        if let Err(e) = self.start_components() {
            for group in self.groups.values() {
                group.stop();
            }
            self.gossip.stop();
            *lifecycle = Lifecycle::ShutDown;
            return Err(e);
        }

        *lifecycle = Lifecycle::Running;
        info!(node = %self.config.node_id, "Swarm coordinator initialized");
        Ok(())
    }

    fn start_components(&self) -> CoordinatorResult<()> {
        for group in self.groups.values() {
            group.start()?;
        }
        self.gossip.start()?;
        Ok(())
    }

    /// Stop every consensus group and the gossip store. Idempotent.
    pub fn shutdown(&self) {
        let mut lifecycle = lock_or_recover(&self.lifecycle, "coordinator lifecycle");
        if *lifecycle == Lifecycle::ShutDown {
            return;
        }
        *lifecycle = Lifecycle::ShutDown;
        drop(lifecycle);

        for group in self.groups.values() {
            group.stop();
        }
        self.gossip.stop();
        info!(node = %self.config.node_id, "Swarm coordinator shut down");
    }

    pub fn is_running(&self) -> bool {
        *lock_or_recover(&self.lifecycle, "coordinator lifecycle") == Lifecycle::Running
    }

    fn ensure_open(&self) -> CoordinatorResult<()> {
        if *lock_or_recover(&self.lifecycle, "coordinator lifecycle") == Lifecycle::ShutDown {
            return Err(CoordinatorError::ShutDown);
        }
        Ok(())
    }

    /// Register an agent, or replace the record of an already registered id
    ///
    /// Replacing does not count against capacity and may move the agent to
    /// another category. Local state is updated before the gossip
    /// announcement; announcement failures are logged only.
    pub fn register_agent(
        &self,
        agent_id: AgentId,
        faj_code: FajCode,
        category: Category,
        embedding: Vec<f32>,
    ) -> CoordinatorResult<()> {
        self.ensure_open()?;
        let metrics = &self.context.metrics;

        if !self.groups.contains_key(&category) {
            metrics.record_rejection(RejectionReason::UnknownCategory);
            return Err(CoordinatorError::UnknownCategory(category));
        }

        let _write_path = lock_or_recover(&self.write_path, "coordinator write path");
        let now = self.context.clock.now();
        let registered = {
            let mut state = write_or_recover(&self.state, "swarm state");
            let SwarmState { registry, router } = &mut *state;

            if !registry.contains(&agent_id) && registry.len() >= self.config.max_agents {
                metrics.record_rejection(RejectionReason::Capacity);
                warn!(agent_id = %agent_id, max = self.config.max_agents, "Registration refused, capacity reached");
                return Err(CoordinatorError::Capacity {
                    max: self.config.max_agents,
                });
            }

            if let Err(e) = router.add_agent(
                agent_id.clone(),
                faj_code.clone(),
                category.clone(),
                embedding.clone(),
            ) {
                metrics.record_rejection(RejectionReason::Validation);
                return Err(e.into());
            }

            let previous = registry.insert(AgentRecord::new(
                agent_id.clone(),
                faj_code.clone(),
                category.clone(),
                embedding,
                now,
            ));
            if let Some(previous) = previous {
                debug!(
                    agent_id = %agent_id,
                    from = %previous.category,
                    to = %category,
                    "Replaced agent registration"
                );
            }
            registry.len()
        };

        metrics.record_registration(registered);
        info!(agent_id = %agent_id, category = %category, total = registered, "Agent registered");

        self.announce(
            &agent_id,
            json!({
                "status": "registered",
                "agent_id": agent_id,
                "faj_code": faj_code,
                "category": category,
                "node": self.config.node_id,
            }),
        );
        Ok(())
    }

    /// Remove an agent; returns whether it was registered
    pub fn unregister_agent(&self, agent_id: &AgentId) -> CoordinatorResult<bool> {
        self.ensure_open()?;

        let _write_path = lock_or_recover(&self.write_path, "coordinator write path");
        let removed = {
            let mut state = write_or_recover(&self.state, "swarm state");
            let record = state.registry.remove(agent_id);
            state.router.remove_agent(agent_id);
            record.map(|record| (record, state.registry.len()))
        };

        let Some((record, remaining)) = removed else {
            debug!(agent_id = %agent_id, "Unregister of unknown agent");
            return Ok(false);
        };

        self.context.metrics.record_unregistration(remaining);
        info!(agent_id = %agent_id, category = %record.category, total = remaining, "Agent unregistered");

        self.announce(
            agent_id,
            json!({
                "status": "unregistered",
                "agent_id": agent_id,
                "category": record.category,
                "node": self.config.node_id,
            }),
        );
        Ok(true)
    }

    fn announce(&self, agent_id: &AgentId, presence: Value) {
        let key = presence_key(agent_id);
        if let Err(e) = self.gossip.spread(&key, presence, None) {
            warn!(key = %key, error = %e, "Presence announcement not spread");
        }
    }

    /// Mark an agent alive as of now
    pub fn record_heartbeat(&self, agent_id: &AgentId) -> CoordinatorResult<()> {
        self.ensure_open()?;
        let now = self.context.clock.now();
        let mut state = write_or_recover(&self.state, "swarm state");
        let record = state
            .registry
            .get_mut(agent_id)
            .ok_or_else(|| CoordinatorError::UnknownAgent(agent_id.clone()))?;
        record.last_heartbeat = now;
        record.healthy = true;
        Ok(())
    }

    /// Best-matching agents across every category
    pub fn route_query(&self, query: &RoutingQuery) -> CoordinatorResult<Vec<RoutedCandidate>> {
        let embedding = query
            .embedding
            .as_deref()
            .ok_or(CoordinatorError::MissingEmbedding)?;

        let started = Instant::now();
        let candidates = read_or_recover(&self.state, "swarm state")
            .router
            .route(embedding, query.top_k)?;
        self.context.metrics.record_route(false, started.elapsed());
        Ok(candidates)
    }

    /// Best-matching agents within one category
    pub fn route_to_category(
        &self,
        query: &RoutingQuery,
        category: &Category,
    ) -> CoordinatorResult<Vec<RoutedCandidate>> {
        let embedding = query
            .embedding
            .as_deref()
            .ok_or(CoordinatorError::MissingEmbedding)?;
        if !self.groups.contains_key(category) {
            return Err(CoordinatorError::UnknownCategory(category.clone()));
        }

        let started = Instant::now();
        let candidates = read_or_recover(&self.state, "swarm state")
            .router
            .route_to_category(embedding, category, query.top_k)?;
        self.context.metrics.record_route(true, started.elapsed());
        Ok(candidates)
    }

    /// Aggregate health of agents, consensus groups and gossip
    pub fn get_health(&self) -> CoordinatorHealth {
        let now = self.context.clock.now();
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout())
            .unwrap_or(chrono::Duration::MAX);

        let state = read_or_recover(&self.state, "swarm state");
        let total_agents = state.registry.len();
        let healthy_agents = state
            .registry
            .records()
            .filter(|record| record.is_healthy_at(now, timeout))
            .count();

        let categories: Vec<CategoryStatus> = self
            .groups
            .iter()
            .map(|(category, group)| CategoryStatus {
                category: category.clone(),
                agent_count: state.registry.category_count(category),
                is_leader: group.is_leader(),
                role: group.role(),
                leader: group.leader(),
                term: group.current_term(),
            })
            .collect();
        drop(state);

        let consensus_ready = categories.iter().any(|status| status.leader.is_some());

        CoordinatorHealth {
            node_id: self.config.node_id.clone(),
            total_agents,
            healthy_agents,
            categories,
            consensus_ready,
            gossip_entries: self.gossip.len(),
            gossip_peers: self.gossip.peers().len(),
            gossip_running: self.gossip.is_running(),
        }
    }

    /// Health as per-component records
    pub fn health_report(&self) -> SystemHealth {
        self.get_health().to_system_health()
    }

    /// The consensus group serving `category`
    pub fn get_category_coordinator(&self, category: &Category) -> Option<&ConsensusGroup> {
        self.groups.get(category)
    }

    fn group(&self, category: &Category) -> CoordinatorResult<&ConsensusGroup> {
        self.groups
            .get(category)
            .ok_or_else(|| CoordinatorError::UnknownCategory(category.clone()))
    }

    /// Committed value of `key` in `category`'s replicated state
    pub fn get(&self, category: &Category, key: &str) -> CoordinatorResult<Option<Value>> {
        Ok(self.group(category)?.get(key))
    }

    /// Replicate `command` through `category`'s group; returns its log index
    ///
    /// Only the group leader accepts proposals. With a configured proposal
    /// timeout the wait for the commit is bounded.
    pub async fn propose(&self, category: &Category, command: Command) -> CoordinatorResult<u64> {
        let group = self.group(category)?;

        let outcome = match self.config.proposal_timeout() {
            Some(limit) => match tokio::time::timeout(limit, group.propose(command)).await {
                Ok(result) => result.map_err(CoordinatorError::from),
                Err(_) => Err(CoordinatorError::ProposalTimeout {
                    category: category.clone(),
                    timeout_ms: self.config.proposal_timeout_ms.unwrap_or_default(),
                }),
            },
            None => group.propose(command).await.map_err(CoordinatorError::from),
        };

        self.context
            .metrics
            .record_proposal(category.as_str(), outcome.is_ok());
        if let Err(e) = &outcome {
            debug!(category = %category, error = %e, "Proposal failed");
        }
        outcome
    }

    /// The gossip store, for subscriptions and direct reads
    pub fn gossip(&self) -> &GossipStore {
        &self.gossip
    }

    /// Deliver an inbound consensus RPC to `category`'s group
    pub fn handle_consensus_message(
        &self,
        category: &Category,
        from: &NodeId,
        message: ConsensusMessage,
    ) -> CoordinatorResult<()> {
        self.group(category)?.handle_message(from, message);
        Ok(())
    }

    /// Deliver an inbound consensus envelope
    pub fn handle_consensus_envelope(&self, envelope: ConsensusEnvelope) -> CoordinatorResult<()> {
        self.handle_consensus_message(&envelope.category, &envelope.from, envelope.message)
    }

    /// Deliver an inbound gossip push; returns how many updates applied
    pub fn handle_gossip_push(&self, push: GossipPush) -> usize {
        let total = push.messages.len();
        let applied = self.gossip.handle_push(push);

        let metrics = &self.context.metrics;
        for _ in 0..applied {
            metrics.record_gossip_message(true);
        }
        for _ in applied..total {
            metrics.record_gossip_message(false);
        }
        applied
    }

    pub fn agent(&self, agent_id: &AgentId) -> Option<AgentRecord> {
        read_or_recover(&self.state, "swarm state")
            .registry
            .get(agent_id)
            .cloned()
    }

    /// Records of every agent in `category`, sorted by id
    pub fn agents_in_category(&self, category: &Category) -> Vec<AgentRecord> {
        let state = read_or_recover(&self.state, "swarm state");
        state
            .registry
            .in_category(category)
            .iter()
            .filter_map(|id| state.registry.get(id).cloned())
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        read_or_recover(&self.state, "swarm state").registry.len()
    }

    pub fn router_stats(&self) -> RouterStats {
        read_or_recover(&self.state, "swarm state").router.stats()
    }

    /// Rebuild the routing index from the registered embeddings
    pub fn rebuild_index(&self) {
        write_or_recover(&self.state, "swarm state").router.rebuild();
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn metrics(&self) -> &CoordinationMetrics {
        &self.context.metrics
    }

    /// Prometheus text exposition of this coordinator's metrics
    pub fn metrics_text(&self) -> CoordinatorResult<String> {
        self.export_elections();
        Ok(self.context.metrics.gather_text()?)
    }

    fn export_elections(&self) {
        let mut exported = lock_or_recover(&self.elections_exported, "election export");
        for (category, group) in &self.groups {
            let won = group.stats().elections_won;
            let seen = exported.entry(category.clone()).or_insert(0);
            if won > *seen {
                self.context
                    .metrics
                    .record_elections(category.as_str(), won - *seen);
                *seen = won;
            }
        }
    }
}

impl Drop for SwarmCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SwarmCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmCoordinator")
            .field("node_id", &self.config.node_id)
            .field("categories", &self.groups.keys().collect::<Vec<_>>())
            .field("agents", &self.agent_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elex_core::ManualClock;
    use elex_testing::{agent_id, axis_embedding, category, faj_code};
    use std::sync::Arc;
    use std::time::Duration;

    const DIMS: usize = 4;

    fn config(max_agents: usize) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::new(
            NodeId::new_unchecked("coordinator-1"),
            vec![category("energy"), category("mobility")],
        );
        config.max_agents = max_agents;
        config.router.dimensions = DIMS;
        config
    }

    fn coordinator(max_agents: usize) -> SwarmCoordinator {
        let context = CoordinatorContext::new("elex").unwrap();
        SwarmCoordinator::new(config(max_agents), context).unwrap()
    }

    fn register(coordinator: &SwarmCoordinator, n: usize, cat: &str, axis: usize) {
        coordinator
            .register_agent(agent_id(n), faj_code(n), category(cat), axis_embedding(DIMS, axis))
            .unwrap();
    }

    #[tokio::test]
    async fn test_initialize_elects_single_node_leaders() {
        let coordinator = coordinator(10);
        assert!(!coordinator.get_health().consensus_ready);

        coordinator.initialize().unwrap();
        coordinator.initialize().unwrap();

        let health = coordinator.get_health();
        assert!(health.consensus_ready);
        assert!(health.categories.iter().all(|status| status.is_leader));
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let coordinator = coordinator(2);
        register(&coordinator, 0, "energy", 0);
        register(&coordinator, 1, "energy", 1);

        let err = coordinator
            .register_agent(agent_id(2), faj_code(2), category("energy"), axis_embedding(DIMS, 2))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Capacity { max: 2 }));
        assert_eq!(coordinator.agent_count(), 2);
        assert!(coordinator.agent(&agent_id(2)).is_none());

        // Re-registering an existing agent is not a new slot
        register(&coordinator, 1, "mobility", 3);
        assert_eq!(coordinator.agent_count(), 2);
    }

    #[tokio::test]
    async fn test_reregistration_moves_category() {
        let coordinator = coordinator(10);
        register(&coordinator, 0, "energy", 0);
        register(&coordinator, 0, "mobility", 0);

        assert!(coordinator.agents_in_category(&category("energy")).is_empty());
        assert_eq!(coordinator.agents_in_category(&category("mobility")).len(), 1);

        let query = RoutingQuery::new(axis_embedding(DIMS, 0));
        assert!(
            coordinator
                .route_to_category(&query, &category("energy"))
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_rejections_leave_no_trace() {
        let coordinator = coordinator(10);

        let unknown = coordinator.register_agent(
            agent_id(0),
            faj_code(0),
            category("unknown"),
            axis_embedding(DIMS, 0),
        );
        assert!(matches!(unknown, Err(CoordinatorError::UnknownCategory(_))));

        let bad_dims =
            coordinator.register_agent(agent_id(0), faj_code(0), category("energy"), vec![1.0]);
        assert!(matches!(bad_dims, Err(CoordinatorError::Router(_))));

        assert_eq!(coordinator.agent_count(), 0);
        assert!(coordinator.gossip().get(&presence_key(&agent_id(0))).is_none());
    }

    #[tokio::test]
    async fn test_registration_announced_over_gossip() {
        let coordinator = coordinator(10);
        register(&coordinator, 7, "energy", 0);

        let entry = coordinator.gossip().get("agent:agent-7").unwrap();
        assert_eq!(entry.value["status"], "registered");
        assert_eq!(entry.value["category"], "energy");

        assert!(coordinator.unregister_agent(&agent_id(7)).unwrap());
        assert!(!coordinator.unregister_agent(&agent_id(7)).unwrap());

        let entry = coordinator.gossip().get("agent:agent-7").unwrap();
        assert_eq!(entry.value["status"], "unregistered");
        assert_eq!(entry.version, 2);
    }

    #[tokio::test]
    async fn test_route_requires_embedding() {
        let coordinator = coordinator(10);
        register(&coordinator, 0, "energy", 0);

        let query = RoutingQuery {
            embedding: None,
            top_k: 3,
        };
        assert!(matches!(
            coordinator.route_query(&query),
            Err(CoordinatorError::MissingEmbedding)
        ));
        assert!(matches!(
            coordinator.route_to_category(&query, &category("energy")),
            Err(CoordinatorError::MissingEmbedding)
        ));
    }

    #[tokio::test]
    async fn test_route_to_category_filters_and_orders() {
        let coordinator = coordinator(10);
        coordinator
            .register_agent(agent_id(0), faj_code(0), category("energy"), vec![1.0, 0.0, 0.0, 0.0])
            .unwrap();
        coordinator
            .register_agent(agent_id(1), faj_code(1), category("energy"), vec![0.8, 0.2, 0.0, 0.0])
            .unwrap();
        coordinator
            .register_agent(agent_id(2), faj_code(2), category("energy"), vec![0.0, 0.0, 1.0, 0.0])
            .unwrap();
        coordinator
            .register_agent(agent_id(3), faj_code(3), category("mobility"), vec![1.0, 0.0, 0.0, 0.0])
            .unwrap();

        let query = RoutingQuery::new(vec![1.0, 0.0, 0.0, 0.0]).with_top_k(2);
        let results = coordinator
            .route_to_category(&query, &category("energy"))
            .unwrap();

        let ids: Vec<_> = results.iter().map(|c| c.agent_id.clone()).collect();
        assert_eq!(ids, vec![agent_id(0), agent_id(1)]);
        assert!(results[0].similarity >= results[1].similarity);

        let everywhere = coordinator.route_query(&query).unwrap();
        assert_eq!(everywhere.len(), 2);
        assert_eq!(coordinator.router_stats().calls, 2);
    }

    #[tokio::test]
    async fn test_heartbeat_health_window() {
        let clock = Arc::new(ManualClock::starting_now());
        let context = CoordinatorContext::new("elex").unwrap().with_clock(clock.clone());
        let coordinator = SwarmCoordinator::new(config(10), context).unwrap();

        register(&coordinator, 0, "energy", 0);
        register(&coordinator, 1, "energy", 1);
        assert_eq!(coordinator.get_health().healthy_agents, 2);

        clock.advance(chrono::Duration::seconds(20));
        coordinator.record_heartbeat(&agent_id(0)).unwrap();
        clock.advance(chrono::Duration::seconds(15));

        let health = coordinator.get_health();
        assert_eq!(health.total_agents, 2);
        assert_eq!(health.healthy_agents, 1);
        // Silent agents are reported, never removed
        assert!(coordinator.agent(&agent_id(1)).is_some());

        assert!(matches!(
            coordinator.record_heartbeat(&agent_id(9)),
            Err(CoordinatorError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_propose_and_get_pass_through() {
        let coordinator = coordinator(10);
        coordinator.initialize().unwrap();

        let energy = category("energy");
        coordinator
            .propose(&energy, Command::set("sleep_threshold", json!(0.3)))
            .await
            .unwrap();

        assert_eq!(
            coordinator.get(&energy, "sleep_threshold").unwrap(),
            Some(json!(0.3))
        );
        assert_eq!(coordinator.get(&category("mobility"), "sleep_threshold").unwrap(), None);
        assert!(matches!(
            coordinator.get(&category("unknown"), "x"),
            Err(CoordinatorError::UnknownCategory(_))
        ));
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn test_propose_before_initialize_is_not_leader() {
        let coordinator = coordinator(10);
        let err = coordinator
            .propose(&category("energy"), Command::set("x", json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Consensus(elex_consensus::ConsensusError::NotLeader { .. })
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_peers_block_leadership() {
        let mut config = config(10);
        config.peers.insert(
            category("energy"),
            vec![NodeId::new_unchecked("coordinator-2"), NodeId::new_unchecked("coordinator-3")],
        );
        let coordinator =
            SwarmCoordinator::new(config, CoordinatorContext::new("elex").unwrap()).unwrap();
        coordinator.initialize().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let health = coordinator.get_health();
        let energy = &health.categories[0];
        assert_eq!(energy.category, category("energy"));
        assert!(!energy.is_leader);
        assert!(energy.term >= 1);
        // The peerless category still elected itself
        assert!(health.consensus_ready);

        let err = coordinator
            .propose(&category("energy"), Command::set("x", json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Consensus(_)));
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let coordinator = coordinator(10);
        coordinator.initialize().unwrap();
        coordinator.shutdown();
        coordinator.shutdown();

        assert!(!coordinator.is_running());
        assert!(matches!(coordinator.initialize(), Err(CoordinatorError::ShutDown)));
        assert!(matches!(
            coordinator.register_agent(agent_id(0), faj_code(0), category("energy"), axis_embedding(DIMS, 0)),
            Err(CoordinatorError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_refused_after_shutdown() {
        let coordinator = coordinator(10);
        register(&coordinator, 0, "energy", 0);
        coordinator.record_heartbeat(&agent_id(0)).unwrap();

        coordinator.shutdown();
        assert!(matches!(
            coordinator.record_heartbeat(&agent_id(0)),
            Err(CoordinatorError::ShutDown)
        ));
    }

    #[test]
    fn test_racing_register_and_unregister_keep_presence_in_step() {
        let coordinator = coordinator(10);
        let key = presence_key(&agent_id(0));

        for round in 0..200 {
            if round % 2 == 0 {
                register(&coordinator, 0, "energy", 0);
            }
            let barrier = std::sync::Barrier::new(2);
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    register(&coordinator, 0, "energy", 1);
                });
                scope.spawn(|| {
                    barrier.wait();
                    coordinator.unregister_agent(&agent_id(0)).unwrap();
                });
            });

            let registered = coordinator.agent(&agent_id(0)).is_some();
            let status = coordinator.gossip().get(&key).unwrap().value["status"].clone();
            let expected = if registered { "registered" } else { "unregistered" };
            assert_eq!(status, expected, "round {round}");
        }
    }

    #[tokio::test]
    async fn test_metrics_text() {
        let coordinator = coordinator(1);
        coordinator.initialize().unwrap();
        register(&coordinator, 0, "energy", 0);
        let _ = coordinator.register_agent(agent_id(1), faj_code(1), category("energy"), axis_embedding(DIMS, 1));
        coordinator
            .route_query(&RoutingQuery::new(axis_embedding(DIMS, 0)))
            .unwrap();

        let text = coordinator.metrics_text().unwrap();
        assert!(text.contains("elex_agent_registrations_total 1"));
        assert!(text.contains(r#"elex_agent_registration_rejections_total{reason="capacity"} 1"#));
        assert!(text.contains(r#"elex_leader_elections_total{category="energy"} 1"#));
        assert!(text.contains(r#"elex_route_calls_total{scope="all"} 1"#));

        // Exported once, not on every scrape
        let again = coordinator.metrics_text().unwrap();
        assert!(again.contains(r#"elex_leader_elections_total{category="energy"} 1"#));
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn test_health_report_components() {
        let coordinator = coordinator(10);
        coordinator.initialize().unwrap();
        register(&coordinator, 0, "energy", 0);

        let report = coordinator.health_report();
        assert!(report.status.is_healthy());
        assert!(report.component("consensus:energy").is_some());
        assert!(report.component("consensus:mobility").is_some());
        assert!(report.component("gossip").is_some());
        coordinator.shutdown();
    }
}
