//! Process-wide collaborators handed to the coordinator
//!
//! Built once at start-up and passed to [`SwarmCoordinator::new`]. Nothing
//! in the coordination layer reaches for a global instead.
//!
//! [`SwarmCoordinator::new`]: crate::SwarmCoordinator::new

use std::sync::Arc;

use elex_consensus::{ConsensusEnvelope, SharedSnapshotStore};
use elex_core::{Category, Disconnected, SharedClock, SharedTransport, SystemClock};
use elex_gossip::GossipPush;
use elex_observability::CoordinationMetrics;

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorResult;

/// Produces the snapshot store backing one category's consensus group
pub type SnapshotStoreFactory = Arc<dyn Fn(&Category) -> SharedSnapshotStore + Send + Sync>;

/// Clock, transports, persistence and metrics for one coordinator
#[derive(Clone)]
pub struct CoordinatorContext {
    pub clock: SharedClock,
    /// Outbound consensus RPCs; envelopes carry their category
    pub consensus_transport: SharedTransport<ConsensusEnvelope>,
    pub gossip_transport: SharedTransport<GossipPush>,
    pub snapshot_stores: Option<SnapshotStoreFactory>,
    pub metrics: CoordinationMetrics,
}

impl CoordinatorContext {
    /// System clock, disconnected transports, no persistence
    pub fn new(namespace: &str) -> CoordinatorResult<Self> {
        Ok(Self {
            clock: SystemClock::shared(),
            consensus_transport: Arc::new(Disconnected::new()),
            gossip_transport: Arc::new(Disconnected::new()),
            snapshot_stores: None,
            metrics: CoordinationMetrics::new(namespace)?,
        })
    }

    /// Defaults with metrics named after `config.observability.namespace`
    pub fn from_config(config: &CoordinatorConfig) -> CoordinatorResult<Self> {
        Self::new(&config.observability.namespace)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_consensus_transport(
        mut self,
        transport: SharedTransport<ConsensusEnvelope>,
    ) -> Self {
        self.consensus_transport = transport;
        self
    }

    pub fn with_gossip_transport(mut self, transport: SharedTransport<GossipPush>) -> Self {
        self.gossip_transport = transport;
        self
    }

    pub fn with_snapshot_stores<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Category) -> SharedSnapshotStore + Send + Sync + 'static,
    {
        self.snapshot_stores = Some(Arc::new(factory));
        self
    }
}

impl std::fmt::Debug for CoordinatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorContext")
            .field("clock", &self.clock)
            .field("persistent", &self.snapshot_stores.is_some())
            .finish()
    }
}
