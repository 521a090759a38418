//! Timer- and transport-driven consensus group
//!
//! A [`ConsensusGroup`] wraps a [`RaftNode`] with an election timer, a
//! leader heartbeat, outbound delivery and optional snapshot persistence.
//! All state lives behind one mutex; timer callbacks hold only a weak
//! reference and re-check their [`TimerToken`] under that mutex, so a
//! timer racing a role change or [`stop`](ConsensusGroup::stop) is a no-op.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use elex_core::sync::lock_or_recover;
use elex_core::{
    Category, Disconnected, NodeId, Scheduler, SharedClock, SharedTransport, SnapshotStore,
    SystemClock, TimerToken, TransportError,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, ConsensusResult};
use crate::messages::{ConsensusEnvelope, ConsensusMessage, Outbound};
use crate::node::{ConsensusSnapshot, ConsensusStats, RaftNode, Role, Step};

const ELECTION_SLOT: &str = "election";
const HEARTBEAT_SLOT: &str = "heartbeat";

/// Shared snapshot store handle
pub type SharedSnapshotStore = Arc<dyn SnapshotStore<ConsensusSnapshot>>;

type Waiter = oneshot::Sender<ConsensusResult<u64>>;

struct GroupState {
    node: RaftNode,
    waiters: BTreeMap<u64, Vec<Waiter>>,
    rng: StdRng,
    started: bool,
    stopped: bool,
}

struct GroupShared {
    category: Category,
    state: Mutex<GroupState>,
    scheduler: Scheduler,
    transport: SharedTransport<ConsensusEnvelope>,
    snapshots: Option<SharedSnapshotStore>,
    clock: SharedClock,
}

/// One category's consensus group member
///
/// Cloning yields another handle to the same member.
#[derive(Clone)]
pub struct ConsensusGroup {
    shared: Arc<GroupShared>,
}

/// Builder for [`ConsensusGroup`]
pub struct ConsensusGroupBuilder {
    id: NodeId,
    category: Category,
    config: ConsensusConfig,
    transport: Option<SharedTransport<ConsensusEnvelope>>,
    snapshots: Option<SharedSnapshotStore>,
    clock: Option<SharedClock>,
    rng_seed: Option<u64>,
}

impl ConsensusGroupBuilder {
    /// Deliver outbound RPCs through `transport`
    pub fn transport(mut self, transport: SharedTransport<ConsensusEnvelope>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Persist durable state to `store` and recover from it on build
    pub fn snapshot_store(mut self, store: SharedSnapshotStore) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Timestamp log entries with `clock`
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed election timeout randomisation
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Validate the configuration, recover any stored snapshot and build
    pub fn build(self) -> ConsensusResult<ConsensusGroup> {
        self.config.validate(&self.id)?;

        let mut node = RaftNode::new(self.id.clone(), self.config);
        if let Some(store) = &self.snapshots {
            if let Some(snapshot) = store.load_snapshot()? {
                node.restore(snapshot)?;
                info!(node = %self.id, category = %self.category, "Recovered consensus snapshot");
            }
        }

        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let scheduler = Scheduler::new(format!("consensus:{}:{}", self.category, self.id));

        Ok(ConsensusGroup {
            shared: Arc::new(GroupShared {
                category: self.category,
                state: Mutex::new(GroupState {
                    node,
                    waiters: BTreeMap::new(),
                    rng,
                    started: false,
                    stopped: false,
                }),
                scheduler,
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(Disconnected::new())),
                snapshots: self.snapshots,
                clock: self.clock.unwrap_or_else(SystemClock::shared),
            }),
        })
    }
}

impl ConsensusGroup {
    /// Start building a group member
    pub fn builder(id: NodeId, category: Category, config: ConsensusConfig) -> ConsensusGroupBuilder {
        ConsensusGroupBuilder {
            id,
            category,
            config,
            transport: None,
            snapshots: None,
            clock: None,
            rng_seed: None,
        }
    }

    /// Arm the election timer, or elect immediately when there are no peers
    ///
    /// Idempotent while running; a stopped group cannot be restarted.
    pub fn start(&self) -> ConsensusResult<()> {
        let mut state = self.lock();
        if state.stopped {
            return Err(ConsensusError::Stopped);
        }
        if state.started {
            return Ok(());
        }
        state.started = true;

        info!(
            node = %state.node.id(),
            category = %self.shared.category,
            peers = state.node.config().peers.len(),
            "Consensus group started"
        );

        if state.node.config().peers.is_empty() {
            let before = state.node.role();
            let step = state.node.on_election_timeout();
            self.apply_step(&mut state, before, step);
        } else {
            self.arm_election_timer(&mut state);
        }
        Ok(())
    }

    /// Cancel all timers and fail pending proposals. Idempotent.
    ///
    /// No timer callback has any effect once this returns.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        self.shared.scheduler.shutdown();

        for (_, waiters) in std::mem::take(&mut state.waiters) {
            for waiter in waiters {
                let _ = waiter.send(Err(ConsensusError::Stopped));
            }
        }
        info!(node = %state.node.id(), category = %self.shared.category, "Consensus group stopped");
    }

    /// Start an election now instead of waiting for the timer
    pub fn campaign(&self) -> ConsensusResult<()> {
        let mut state = self.lock();
        if state.stopped {
            return Err(ConsensusError::Stopped);
        }
        let before = state.node.role();
        let step = state.node.on_election_timeout();
        self.apply_step(&mut state, before, step);
        Ok(())
    }

    /// Replicate `command` and wait for it to commit
    ///
    /// Fails immediately with `NotLeader` on a follower. Without peers the
    /// entry is committed before the first poll. The caller applies its own
    /// timeout; a leader cut off from its majority waits until it learns of
    /// a newer term and then fails with `LeadershipLost`.
    pub async fn propose(&self, command: Command) -> ConsensusResult<u64> {
        let receiver = {
            let mut state = self.lock();
            if state.stopped {
                return Err(ConsensusError::Stopped);
            }

            let before = state.node.role();
            let now = self.shared.clock.now();
            let index = state.node.propose(command, now)?;

            let (sender, receiver) = oneshot::channel();
            state.waiters.entry(index).or_default().push(sender);

            let step = state.node.heartbeat();
            self.apply_step(&mut state, before, step);
            receiver
        };

        receiver.await.map_err(|_| ConsensusError::Stopped)?
    }

    /// Feed an inbound RPC from `from`
    pub fn handle_message(&self, from: &NodeId, message: ConsensusMessage) {
        let mut state = self.lock();
        if state.stopped {
            debug!(category = %self.shared.category, from = %from, "Dropping message for stopped group");
            return;
        }
        let before = state.node.role();
        let step = state.node.handle_message(from, message);
        self.apply_step(&mut state, before, step);
    }

    /// Committed value of `key` on this member
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().node.get(key).cloned()
    }

    /// Committed value of `key`, only answered by the leader
    pub fn get_linearizable(&self, key: &str) -> ConsensusResult<Option<Value>> {
        let state = self.lock();
        if !state.node.is_leader() {
            return Err(ConsensusError::NotLeader {
                leader: state.node.leader().cloned(),
            });
        }
        Ok(state.node.get(key).cloned())
    }

    /// Durable state snapshot
    pub fn state(&self) -> ConsensusSnapshot {
        self.lock().node.snapshot()
    }

    /// Replace the member's state with `snapshot`
    ///
    /// The member comes back as a follower; a leader that is restored fails
    /// its pending proposals with `LeadershipLost`.
    pub fn restore_state(&self, snapshot: ConsensusSnapshot) -> ConsensusResult<()> {
        let mut state = self.lock();
        if state.stopped {
            return Err(ConsensusError::Stopped);
        }
        let before = state.node.role();
        state.node.restore(snapshot)?;
        let step = Step {
            outbound: Vec::new(),
            reset_election_timer: true,
        };
        self.apply_step(&mut state, before, step);
        self.persist(&mut state, true);
        Ok(())
    }

    pub fn id(&self) -> NodeId {
        self.lock().node.id().clone()
    }

    pub fn category(&self) -> &Category {
        &self.shared.category
    }

    pub fn role(&self) -> Role {
        self.lock().node.role()
    }

    pub fn is_leader(&self) -> bool {
        self.lock().node.is_leader()
    }

    /// Leader this member currently recognises
    pub fn leader(&self) -> Option<NodeId> {
        self.lock().node.leader().cloned()
    }

    pub fn current_term(&self) -> u64 {
        self.lock().node.current_term()
    }

    pub fn commit_index(&self) -> u64 {
        self.lock().node.commit_index()
    }

    pub fn stats(&self) -> ConsensusStats {
        self.lock().node.stats().clone()
    }

    pub fn is_running(&self) -> bool {
        let state = self.lock();
        state.started && !state.stopped
    }

    fn lock(&self) -> MutexGuard<'_, GroupState> {
        lock_or_recover(&self.shared.state, "consensus group")
    }

    /// Turn a node transition into timer changes, sends, waiter wake-ups
    /// and persistence
    fn apply_step(&self, state: &mut GroupState, before: Role, step: Step) {
        let after = state.node.role();

        match (before == Role::Leader, after == Role::Leader) {
            (false, true) => {
                self.shared.scheduler.cancel(ELECTION_SLOT);
                self.arm_heartbeat(state);
            }
            (true, false) => {
                self.shared.scheduler.cancel(HEARTBEAT_SLOT);
                for (index, waiters) in std::mem::take(&mut state.waiters) {
                    for waiter in waiters {
                        let _ = waiter.send(Err(ConsensusError::LeadershipLost { index }));
                    }
                }
                self.arm_election_timer(state);
            }
            _ => {
                if step.reset_election_timer && after != Role::Leader {
                    self.arm_election_timer(state);
                }
            }
        }

        self.dispatch(state.node.id(), step.outbound);
        self.resolve_committed(state);
        self.persist(state, false);
    }

    fn dispatch(&self, from: &NodeId, outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            let kind = message.kind();
            let envelope = ConsensusEnvelope {
                category: self.shared.category.clone(),
                from: from.clone(),
                message,
            };
            match self.shared.transport.send(&to, envelope) {
                Ok(()) => {}
                Err(TransportError::Unreachable(peer)) => {
                    debug!(category = %self.shared.category, peer = %peer, kind, "Peer unreachable");
                }
                Err(e) => {
                    warn!(category = %self.shared.category, peer = %to, kind, error = %e, "Consensus message not delivered");
                }
            }
        }
    }

    fn resolve_committed(&self, state: &mut GroupState) {
        let commit_index = state.node.commit_index();
        let pending = state.waiters.split_off(&(commit_index + 1));
        let committed = std::mem::replace(&mut state.waiters, pending);
        for (index, waiters) in committed {
            for waiter in waiters {
                let _ = waiter.send(Ok(index));
            }
        }
    }

    fn persist(&self, state: &mut GroupState, force: bool) {
        let dirty = state.node.take_dirty();
        let Some(store) = &self.shared.snapshots else {
            return;
        };
        if !(dirty || force) {
            return;
        }
        if let Err(e) = store.save_snapshot(&state.node.snapshot()) {
            warn!(node = %state.node.id(), category = %self.shared.category, error = %e, "Failed to persist consensus snapshot");
        }
    }

    fn arm_election_timer(&self, state: &mut GroupState) {
        if !state.started || state.stopped {
            return;
        }
        let delay = state.node.config().random_election_timeout(&mut state.rng);
        let weak = Arc::downgrade(&self.shared);

        let result = self
            .shared
            .scheduler
            .schedule_once(ELECTION_SLOT, delay, move |token| {
                if let Some(group) = Self::upgrade(&weak) {
                    group.on_election_timer(token);
                }
            });
        if let Err(e) = result {
            warn!(category = %self.shared.category, error = %e, "Failed to arm election timer");
        }
    }

    fn arm_heartbeat(&self, state: &GroupState) {
        if state.stopped || state.node.config().peers.is_empty() {
            return;
        }
        let interval = state.node.config().heartbeat_interval();
        let weak = Arc::downgrade(&self.shared);

        let result = self
            .shared
            .scheduler
            .schedule_repeating(HEARTBEAT_SLOT, interval, move |token| {
                if let Some(group) = Self::upgrade(&weak) {
                    group.on_heartbeat_timer(token);
                }
            });
        if let Err(e) = result {
            warn!(category = %self.shared.category, error = %e, "Failed to arm heartbeat timer");
        }
    }

    fn upgrade(weak: &Weak<GroupShared>) -> Option<ConsensusGroup> {
        weak.upgrade().map(|shared| ConsensusGroup { shared })
    }

    fn on_election_timer(&self, token: TimerToken) {
        let mut state = self.lock();
        if state.stopped || !self.shared.scheduler.is_current(&token) {
            return;
        }
        let before = state.node.role();
        let step = state.node.on_election_timeout();
        self.apply_step(&mut state, before, step);
    }

    fn on_heartbeat_timer(&self, token: TimerToken) {
        let mut state = self.lock();
        if state.stopped || !self.shared.scheduler.is_current(&token) {
            return;
        }
        let before = state.node.role();
        let step = state.node.heartbeat();
        self.apply_step(&mut state, before, step);
    }
}

impl fmt::Debug for ConsensusGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ConsensusGroup")
            .field("id", state.node.id())
            .field("category", &self.shared.category)
            .field("role", &state.node.role())
            .field("term", &state.node.current_term())
            .field("commit_index", &state.node.commit_index())
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elex_core::{InMemorySnapshotStore, Transport};
    use serde_json::json;
    use std::time::Duration;

    fn solo(seed: u64) -> ConsensusGroup {
        ConsensusGroup::builder(
            NodeId::new_unchecked("node-a"),
            Category::new_unchecked("energy"),
            ConsensusConfig::default(),
        )
        .rng_seed(seed)
        .build()
        .unwrap()
    }

    /// Transport that records envelopes instead of delivering them
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(NodeId, ConsensusEnvelope)>>,
    }

    impl Transport<ConsensusEnvelope> for Recorder {
        fn send(&self, to: &NodeId, message: ConsensusEnvelope) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((to.clone(), message));
            Ok(())
        }

        fn broadcast(&self, _message: ConsensusEnvelope) -> Result<usize, TransportError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_single_node_group_elects_on_start_and_commits() {
        let group = solo(1);
        group.start().unwrap();

        assert!(group.is_leader());
        assert_eq!(group.leader(), Some(NodeId::new_unchecked("node-a")));

        let index = group.propose(Command::set("mode", "eco")).await.unwrap();
        assert_eq!(index, 1);
        assert_eq!(group.get("mode"), Some(json!("eco")));
        assert_eq!(group.get_linearizable("mode").unwrap(), Some(json!("eco")));
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let group = solo(2);
        group.start().unwrap();
        group.start().unwrap();
        assert!(group.is_running());

        group.stop();
        group.stop();
        assert!(!group.is_running());
        assert!(matches!(group.start(), Err(ConsensusError::Stopped)));
        assert!(matches!(
            group.propose(Command::set("k", 1)).await,
            Err(ConsensusError::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_campaigns_after_election_timeout() {
        let recorder = Arc::new(Recorder::default());
        let group = ConsensusGroup::builder(
            NodeId::new_unchecked("node-a"),
            Category::new_unchecked("energy"),
            ConsensusConfig {
                election_timeout_min_ms: 200,
                election_timeout_max_ms: 300,
                ..ConsensusConfig::default()
            }
            .with_peers(vec![
                NodeId::new_unchecked("node-b"),
                NodeId::new_unchecked("node-c"),
            ]),
        )
        .transport(recorder.clone())
        .rng_seed(3)
        .build()
        .unwrap();

        group.start().unwrap();
        assert_eq!(group.role(), Role::Follower);

        tokio::time::sleep(Duration::from_millis(310)).await;

        assert_eq!(group.role(), Role::Candidate);
        assert_eq!(group.current_term(), 1);
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, envelope)| {
            envelope.category.as_str() == "energy"
                && matches!(envelope.message, ConsensusMessage::RequestVote(_))
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_election_after_stop() {
        let group = ConsensusGroup::builder(
            NodeId::new_unchecked("node-a"),
            Category::new_unchecked("energy"),
            ConsensusConfig::default().with_peers(vec![NodeId::new_unchecked("node-b")]),
        )
        .rng_seed(4)
        .build()
        .unwrap();

        group.start().unwrap();
        group.stop();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(group.current_term(), 0);
        assert_eq!(group.role(), Role::Follower);
    }

    #[tokio::test]
    async fn test_follower_rejects_proposals() {
        let group = ConsensusGroup::builder(
            NodeId::new_unchecked("node-a"),
            Category::new_unchecked("energy"),
            ConsensusConfig::default().with_peers(vec![NodeId::new_unchecked("node-b")]),
        )
        .build()
        .unwrap();

        let err = group.propose(Command::set("k", 1)).await.unwrap_err();
        assert!(matches!(err, ConsensusError::NotLeader { leader: None }));
        assert!(group.get_linearizable("k").is_err());
    }

    #[tokio::test]
    async fn test_snapshot_store_round_trip() {
        let store: Arc<InMemorySnapshotStore<ConsensusSnapshot>> =
            Arc::new(InMemorySnapshotStore::new());

        let group = ConsensusGroup::builder(
            NodeId::new_unchecked("node-a"),
            Category::new_unchecked("energy"),
            ConsensusConfig::default(),
        )
        .snapshot_store(store.clone())
        .build()
        .unwrap();
        group.start().unwrap();
        group.propose(Command::set("a", 1)).await.unwrap();
        group.propose(Command::set("b", 2)).await.unwrap();
        group.stop();

        let recovered = ConsensusGroup::builder(
            NodeId::new_unchecked("node-a"),
            Category::new_unchecked("energy"),
            ConsensusConfig::default(),
        )
        .snapshot_store(store)
        .build()
        .unwrap();

        assert_eq!(recovered.commit_index(), 2);
        assert_eq!(recovered.current_term(), 1);
        assert_eq!(recovered.get("b"), Some(json!(2)));

        recovered.start().unwrap();
        assert!(recovered.is_leader());
        assert_eq!(recovered.current_term(), 2);
    }

    #[tokio::test]
    async fn test_persisted_log_stays_bounded() {
        let store: Arc<InMemorySnapshotStore<ConsensusSnapshot>> =
            Arc::new(InMemorySnapshotStore::new());
        let config = ConsensusConfig {
            max_log_entries: 4,
            ..ConsensusConfig::default()
        };

        let group = ConsensusGroup::builder(
            NodeId::new_unchecked("node-a"),
            Category::new_unchecked("energy"),
            config.clone(),
        )
        .snapshot_store(store.clone())
        .build()
        .unwrap();
        group.start().unwrap();
        for i in 0..50 {
            group.propose(Command::set(format!("cell_{}", i % 7), i)).await.unwrap();
        }
        group.stop();

        let saved = store.load_snapshot().unwrap().unwrap();
        assert!(saved.log.len() <= 4);
        assert!(saved.log.snapshot_index() > 0);
        assert_eq!(saved.commit_index, 50);

        let recovered = ConsensusGroup::builder(
            NodeId::new_unchecked("node-a"),
            Category::new_unchecked("energy"),
            config,
        )
        .snapshot_store(store)
        .build()
        .unwrap();
        assert_eq!(recovered.commit_index(), 50);
        assert_eq!(recovered.get("cell_0"), Some(json!(49)));
        assert_eq!(recovered.get("cell_6"), Some(json!(48)));
    }

    #[tokio::test]
    async fn test_restore_state_demotes_leader() {
        let source = solo(5);
        source.start().unwrap();
        source.propose(Command::set("x", "y")).await.unwrap();
        let snapshot = source.state();

        let target = solo(6);
        target.start().unwrap();
        target.restore_state(snapshot).unwrap();

        assert_eq!(target.role(), Role::Follower);
        assert_eq!(target.get("x"), Some(json!("y")));
    }
}
