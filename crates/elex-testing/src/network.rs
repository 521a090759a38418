//! In-memory message network
//!
//! [`LocalNetwork`] hands out one [`Transport`] per node. Sends are queued
//! and delivered later, either explicitly with [`LocalNetwork::deliver_all`]
//! or continuously by a pump task from [`LocalNetwork::spawn_pump`]. Handlers
//! run with no network lock held, so a handler may send again.
//!
//! Links can be cut with [`LocalNetwork::partition`] or
//! [`LocalNetwork::isolate`]. A send over a cut link fails with
//! [`TransportError::Unreachable`]; a queued message whose link is cut
//! before delivery is dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use elex_core::sync::lock_or_recover;
use elex_core::{NodeId, SharedTransport, Transport, TransportError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

/// Receiving side of a node
pub type Handler<M> = Arc<dyn Fn(M) + Send + Sync>;

/// Delivery counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct Envelope<M> {
    from: NodeId,
    to: NodeId,
    message: M,
}

struct NetworkState<M> {
    handlers: HashMap<NodeId, Handler<M>>,
    cut: HashSet<(NodeId, NodeId)>,
    queue: VecDeque<Envelope<M>>,
    stats: NetworkStats,
}

impl<M> NetworkState<M> {
    fn linked(&self, from: &NodeId, to: &NodeId) -> bool {
        !self.cut.contains(&(from.clone(), to.clone()))
    }
}

struct NetworkShared<M> {
    state: Mutex<NetworkState<M>>,
    wakeup: Notify,
}

/// Queue-backed network connecting in-process nodes
pub struct LocalNetwork<M> {
    shared: Arc<NetworkShared<M>>,
}

impl<M> Clone for LocalNetwork<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M> Default for LocalNetwork<M>
where
    M: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> LocalNetwork<M>
where
    M: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(NetworkShared {
                state: Mutex::new(NetworkState {
                    handlers: HashMap::new(),
                    cut: HashSet::new(),
                    queue: VecDeque::new(),
                    stats: NetworkStats::default(),
                }),
                wakeup: Notify::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, NetworkState<M>> {
        lock_or_recover(&self.shared.state, "local network")
    }

    /// Attach `node`'s receiving handler, replacing any previous one
    pub fn register<F>(&self, node: NodeId, handler: F)
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        self.state().handlers.insert(node, Arc::new(handler));
    }

    /// Outbound transport sending as `node`
    pub fn transport(&self, node: NodeId) -> SharedTransport<M> {
        Arc::new(LocalTransport {
            node,
            network: self.clone(),
        })
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.state().handlers.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Cut the link between `a` and `b` in both directions
    pub fn partition(&self, a: &NodeId, b: &NodeId) {
        let mut state = self.state();
        state.cut.insert((a.clone(), b.clone()));
        state.cut.insert((b.clone(), a.clone()));
    }

    /// Cut every link touching `node`
    pub fn isolate(&self, node: &NodeId) {
        let mut state = self.state();
        let others: Vec<NodeId> = state
            .handlers
            .keys()
            .filter(|other| *other != node)
            .cloned()
            .collect();
        for other in others {
            state.cut.insert((node.clone(), other.clone()));
            state.cut.insert((other, node.clone()));
        }
    }

    /// Restore every link
    pub fn heal(&self) {
        self.state().cut.clear();
    }

    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    pub fn stats(&self) -> NetworkStats {
        self.state().stats
    }

    /// Discard every queued message
    pub fn drop_pending(&self) -> usize {
        let mut state = self.state();
        let dropped = state.queue.len();
        state.queue.clear();
        state.stats.dropped += dropped as u64;
        dropped
    }

    /// Reorder queued messages with a seeded shuffle
    pub fn shuffle_pending(&self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut state = self.state();
        state.queue.make_contiguous().shuffle(&mut rng);
    }

    /// Reverse the order of queued messages
    pub fn reverse_pending(&self) {
        let mut state = self.state();
        state.queue.make_contiguous().reverse();
    }

    /// Deliver the oldest queued message; returns false when the queue was empty
    pub fn deliver_next(&self) -> bool {
        let (handler, message) = {
            let mut state = self.state();
            let Some(envelope) = state.queue.pop_front() else {
                return false;
            };
            let handler = state.handlers.get(&envelope.to).cloned();
            match handler {
                Some(handler) if state.linked(&envelope.from, &envelope.to) => {
                    state.stats.delivered += 1;
                    (handler, envelope.message)
                }
                _ => {
                    trace!(from = %envelope.from, to = %envelope.to, "Dropping queued message");
                    state.stats.dropped += 1;
                    return true;
                }
            }
        };
        handler(message);
        true
    }

    /// Deliver until the queue is empty, including messages sent by handlers
    pub fn deliver_all(&self) -> usize {
        let mut delivered = 0;
        while self.deliver_next() {
            delivered += 1;
        }
        delivered
    }

    /// Deliver continuously on the current tokio runtime
    pub fn spawn_pump(&self) -> JoinHandle<()> {
        let network = self.clone();
        tokio::spawn(async move {
            loop {
                network.shared.wakeup.notified().await;
                network.deliver_all();
            }
        })
    }

    fn enqueue(&self, from: &NodeId, to: &NodeId, message: M) -> Result<(), TransportError> {
        {
            let mut state = self.state();
            state.stats.sent += 1;
            if !state.handlers.contains_key(to) || !state.linked(from, to) {
                state.stats.dropped += 1;
                return Err(TransportError::Unreachable(to.clone()));
            }
            state.queue.push_back(Envelope {
                from: from.clone(),
                to: to.clone(),
                message,
            });
        }
        self.shared.wakeup.notify_one();
        Ok(())
    }
}

impl<M> std::fmt::Debug for LocalNetwork<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_or_recover(&self.shared.state, "local network");
        f.debug_struct("LocalNetwork")
            .field("nodes", &state.handlers.len())
            .field("pending", &state.queue.len())
            .field("stats", &state.stats)
            .finish()
    }
}

struct LocalTransport<M> {
    node: NodeId,
    network: LocalNetwork<M>,
}

impl<M> Transport<M> for LocalTransport<M>
where
    M: Clone + Send + 'static,
{
    fn send(&self, to: &NodeId, message: M) -> Result<(), TransportError> {
        self.network.enqueue(&self.node, to, message)
    }

    fn broadcast(&self, message: M) -> Result<usize, TransportError> {
        let targets: Vec<NodeId> = self
            .network
            .nodes()
            .into_iter()
            .filter(|node| node != &self.node)
            .collect();

        let queued = targets
            .iter()
            .filter(|to| self.network.enqueue(&self.node, to, message.clone()).is_ok())
            .count();
        Ok(queued)
    }
}
