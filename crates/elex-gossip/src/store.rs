//! Timer-driven gossip store with subscribers

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use elex_core::sync::{lock_or_recover, read_or_recover, write_or_recover};
use elex_core::{
    Disconnected, NodeId, Scheduler, SharedClock, SharedTransport, SystemClock, TimerToken,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::GossipConfig;
use crate::error::{GossipError, GossipResult};
use crate::message::{GossipEntry, GossipMessage, GossipPush};
use crate::state::{GossipState, GossipStats};

const ROUND_SLOT: &str = "gossip-round";

/// Error type subscribers may return
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&GossipEntry) -> Result<(), SubscriberError> + Send + Sync>;

/// Handle returned by [`GossipStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Inner {
    state: GossipState,
    rng: StdRng,
    started: bool,
    stopped: bool,
}

struct StoreShared {
    inner: Mutex<Inner>,
    subscribers: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    next_subscription: AtomicU64,
    scheduler: Scheduler,
    transport: SharedTransport<GossipPush>,
    clock: SharedClock,
}

/// Eventually consistent key/value store replicated by epidemic push
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct GossipStore {
    shared: Arc<StoreShared>,
}

/// Builder for [`GossipStore`]
pub struct GossipStoreBuilder {
    node_id: NodeId,
    config: GossipConfig,
    transport: Option<SharedTransport<GossipPush>>,
    clock: Option<SharedClock>,
    rng_seed: Option<u64>,
}

impl GossipStoreBuilder {
    pub fn transport(mut self, transport: SharedTransport<GossipPush>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed peer selection
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> GossipResult<GossipStore> {
        self.config.validate()?;

        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let scheduler = Scheduler::new(format!("gossip:{}", self.node_id));

        Ok(GossipStore {
            shared: Arc::new(StoreShared {
                inner: Mutex::new(Inner {
                    state: GossipState::new(self.node_id, self.config),
                    rng,
                    started: false,
                    stopped: false,
                }),
                subscribers: RwLock::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                scheduler,
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(Disconnected::new())),
                clock: self.clock.unwrap_or_else(SystemClock::shared),
            }),
        })
    }
}

impl GossipStore {
    pub fn builder(node_id: NodeId, config: GossipConfig) -> GossipStoreBuilder {
        GossipStoreBuilder {
            node_id,
            config,
            transport: None,
            clock: None,
            rng_seed: None,
        }
    }

    /// Begin periodic rounds. Idempotent while running.
    pub fn start(&self) -> GossipResult<()> {
        let mut inner = self.lock();
        if inner.stopped {
            return Err(GossipError::Stopped);
        }
        if inner.started {
            return Ok(());
        }

        let interval = inner.state.config().round_interval();
        let weak = Arc::downgrade(&self.shared);
        self.shared
            .scheduler
            .schedule_repeating(ROUND_SLOT, interval, move |token| {
                if let Some(store) = Self::upgrade(&weak) {
                    store.on_round_timer(token);
                }
            })?;

        inner.started = true;
        info!(node = %inner.state.node_id(), interval_ms = interval.as_millis() as u64, "Gossip rounds started");
        Ok(())
    }

    /// Cancel the round timer. Idempotent; the store cannot be restarted.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.stopped {
            return;
        }
        inner.stopped = true;
        self.shared.scheduler.shutdown();
        info!(node = %inner.state.node_id(), "Gossip store stopped");
    }

    /// Apply a local update and notify subscribers
    ///
    /// Without `version` the next version after the stored one is used.
    /// Returns `false` when the stored version is at least `version`.
    /// Propagation happens in later rounds; delivery failures never surface
    /// here.
    pub fn spread(&self, key: &str, value: Value, version: Option<u64>) -> GossipResult<bool> {
        let accepted = {
            let mut inner = self.lock();
            if inner.stopped {
                return Err(GossipError::Stopped);
            }
            let now = self.shared.clock.now();
            inner.state.spread(key, value, version, now)?
        };

        match accepted {
            Some(entry) => {
                debug!(key, version = entry.version, "Local gossip update");
                self.notify(&entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply one update from a peer; returns whether local state changed
    pub fn handle_message(&self, message: GossipMessage) -> bool {
        let accepted = {
            let mut inner = self.lock();
            if inner.stopped {
                return false;
            }
            let now = self.shared.clock.now();
            inner.state.receive(message, now)
        };

        match accepted {
            Ok(entry) => {
                self.notify(&entry);
                true
            }
            Err(_) => false,
        }
    }

    /// Apply a pushed batch; returns how many updates changed local state
    pub fn handle_push(&self, push: GossipPush) -> usize {
        let total = push.messages.len();
        let applied = push
            .messages
            .into_iter()
            .map(|message| self.handle_message(message))
            .filter(|applied| *applied)
            .count();
        debug!(from = %push.from, total, applied, "Gossip push handled");
        applied
    }

    /// Run one round now; returns how many peers were handed the push
    pub fn gossip_round(&self) -> usize {
        let mut inner = self.lock();
        if inner.stopped {
            return 0;
        }
        self.round_locked(&mut inner)
    }

    /// Invoke `handler` on every accepted update of `key`
    pub fn subscribe<F>(&self, key: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&GossipEntry) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        write_or_recover(&self.shared.subscribers, "gossip subscribers")
            .entry(key.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = write_or_recover(&self.shared.subscribers, "gossip subscribers");
        let mut removed = false;
        subscribers.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(existing, _)| *existing != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    pub fn add_peer(&self, peer: NodeId) -> bool {
        self.lock().state.add_peer(peer)
    }

    pub fn remove_peer(&self, peer: &NodeId) -> bool {
        self.lock().state.remove_peer(peer)
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.lock().state.peers().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<GossipEntry> {
        self.lock().state.get(key).cloned()
    }

    /// Every stored entry, ordered by key
    pub fn entries(&self) -> Vec<GossipEntry> {
        let mut entries: Vec<GossipEntry> = self.lock().state.entries().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().state.is_empty()
    }

    pub fn stats(&self) -> GossipStats {
        self.lock().state.stats().clone()
    }

    pub fn node_id(&self) -> NodeId {
        self.lock().state.node_id().clone()
    }

    pub fn is_running(&self) -> bool {
        let inner = self.lock();
        inner.started && !inner.stopped
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_or_recover(&self.shared.inner, "gossip store")
    }

    fn upgrade(weak: &Weak<StoreShared>) -> Option<GossipStore> {
        weak.upgrade().map(|shared| GossipStore { shared })
    }

    fn on_round_timer(&self, token: TimerToken) {
        let mut inner = self.lock();
        if inner.stopped || !self.shared.scheduler.is_current(&token) {
            return;
        }
        self.round_locked(&mut inner);
    }

    /// Plan, send and settle a round without releasing the state lock, so
    /// updates accepted concurrently are never cleared unsent
    fn round_locked(&self, inner: &mut Inner) -> usize {
        let now = self.shared.clock.now();
        let Inner { state, rng, .. } = inner;
        let plan = state.plan_round(rng, now);
        if plan.targets.is_empty() {
            return 0;
        }

        let push = GossipPush {
            from: state.node_id().clone(),
            messages: plan.messages,
        };
        let mut delivered = 0;
        for target in &plan.targets {
            match self.shared.transport.send(target, push.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(node = %state.node_id(), peer = %target, error = %e, "Gossip push not delivered");
                }
            }
        }
        state.round_delivered(delivered);

        debug!(
            node = %state.node_id(),
            targets = plan.targets.len(),
            delivered,
            messages = push.messages.len(),
            "Gossip round complete"
        );
        delivered
    }

    /// Call every subscriber of the entry's key; failures are logged and
    /// never stop delivery to the remaining subscribers
    fn notify(&self, entry: &GossipEntry) {
        let handlers: Vec<(SubscriptionId, Handler)> =
            read_or_recover(&self.shared.subscribers, "gossip subscribers")
                .get(&entry.key)
                .cloned()
                .unwrap_or_default();

        let mut failures = 0u64;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(entry))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(key = %entry.key, subscription = id.0, error = %e, "Gossip subscriber failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(key = %entry.key, subscription = id.0, "Gossip subscriber panicked");
                }
            }
        }

        if failures > 0 {
            let mut inner = self.lock();
            for _ in 0..failures {
                inner.state.record_subscriber_failure();
            }
        }
    }
}

impl fmt::Debug for GossipStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("GossipStore")
            .field("node_id", inner.state.node_id())
            .field("entries", &inner.state.len())
            .field("pending", &inner.state.pending_len())
            .field("stopped", &inner.stopped)
            .finish()
    }
}
