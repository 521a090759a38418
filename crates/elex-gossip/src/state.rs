//! Sans-IO gossip state
//!
//! [`GossipState`] applies updates under the version-dominance rule,
//! suppresses duplicates, tracks which keys still need pushing and plans
//! rounds. [`GossipStore`](crate::GossipStore) adds timers, delivery and
//! subscribers on top.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use elex_core::{NodeId, elapsed_ms};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::GossipConfig;
use crate::error::{GossipError, GossipResult};
use crate::message::{GossipEntry, GossipMessage, message_id};

/// Counters describing gossip activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipStats {
    pub rounds: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_rejected: u64,
    pub updates_applied: u64,
    pub seen_purged: u64,
    pub subscriber_failures: u64,
}

/// Why an inbound message was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Duplicate,
    TtlExhausted,
    Expired,
    Superseded,
    CapacityExceeded,
}

/// Messages to push in one round and who to push them to
#[derive(Debug, Clone, Default)]
pub struct RoundPlan {
    pub targets: Vec<NodeId>,
    pub messages: Vec<GossipMessage>,
}

/// Gossip state of one node
#[derive(Debug)]
pub struct GossipState {
    node_id: NodeId,
    config: GossipConfig,
    entries: HashMap<String, GossipEntry>,
    seen: HashMap<String, DateTime<Utc>>,
    /// Keys to push next round with their remaining hop budget
    pending: HashMap<String, u32>,
    peers: BTreeSet<NodeId>,
    stats: GossipStats,
}

impl GossipState {
    pub fn new(node_id: NodeId, config: GossipConfig) -> Self {
        Self {
            node_id,
            config,
            entries: HashMap::new(),
            seen: HashMap::new(),
            pending: HashMap::new(),
            peers: BTreeSet::new(),
            stats: GossipStats::default(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Apply a locally originated update
    ///
    /// Without an explicit version the next version after the stored one is
    /// used. Returns `Ok(None)` when the stored version dominates.
    pub fn spread(
        &mut self,
        key: &str,
        value: Value,
        version: Option<u64>,
        now: DateTime<Utc>,
    ) -> GossipResult<Option<GossipEntry>> {
        if key.is_empty() {
            return Err(GossipError::EmptyKey);
        }

        let stored = self.entries.get(key).map(|entry| entry.version);
        let version = version.unwrap_or_else(|| stored.unwrap_or(0) + 1);

        if stored.is_some_and(|existing| existing >= version) {
            debug!(key, version, stored = ?stored, "Local update superseded");
            return Ok(None);
        }
        if stored.is_none() && self.entries.len() >= self.config.max_entries {
            return Err(GossipError::CapacityExceeded {
                max: self.config.max_entries,
            });
        }

        let entry = GossipEntry {
            key: key.to_string(),
            value,
            version,
            origin: self.node_id.clone(),
            timestamp: now,
        };
        let id = message_id(&entry.origin, key, version);
        self.seen.insert(id, now);
        self.pending.insert(key.to_string(), self.config.default_ttl);
        self.entries.insert(key.to_string(), entry.clone());
        self.stats.updates_applied = self.stats.updates_applied.saturating_add(1);

        Ok(Some(entry))
    }

    /// Apply an update received from a peer
    pub fn receive(
        &mut self,
        message: GossipMessage,
        now: DateTime<Utc>,
    ) -> Result<GossipEntry, Rejection> {
        self.stats.messages_received = self.stats.messages_received.saturating_add(1);

        let outcome = self.check_and_apply(message, now);
        if let Err(reason) = &outcome {
            self.stats.messages_rejected = self.stats.messages_rejected.saturating_add(1);
            debug!(node = %self.node_id, ?reason, "Gossip message rejected");
        }
        outcome
    }

    fn check_and_apply(
        &mut self,
        message: GossipMessage,
        now: DateTime<Utc>,
    ) -> Result<GossipEntry, Rejection> {
        if self.seen.contains_key(&message.id) {
            return Err(Rejection::Duplicate);
        }
        if message.ttl == 0 {
            return Err(Rejection::TtlExhausted);
        }
        if elapsed_ms(message.timestamp, now) > self.config.message_expiry_ms {
            return Err(Rejection::Expired);
        }

        self.seen.insert(message.id.clone(), now);

        let stored = self.entries.get(&message.key).map(|entry| entry.version);
        if stored.is_some_and(|existing| existing >= message.version) {
            return Err(Rejection::Superseded);
        }
        if stored.is_none() && self.entries.len() >= self.config.max_entries {
            return Err(Rejection::CapacityExceeded);
        }

        let entry = message.to_entry();
        let remaining = message.ttl - 1;
        if remaining > 0 {
            self.pending.insert(message.key.clone(), remaining);
        } else {
            // A newer version must not be shadowed by an older pending push
            self.pending.remove(&message.key);
        }
        self.entries.insert(message.key, entry.clone());
        self.stats.updates_applied = self.stats.updates_applied.saturating_add(1);

        Ok(entry)
    }

    /// Drop seen records older than the retention window
    pub fn purge_seen(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.config.seen_retention_ms();
        let before = self.seen.len();
        self.seen
            .retain(|_, first_seen| elapsed_ms(*first_seen, now) <= retention);
        let purged = before - self.seen.len();
        self.stats.seen_purged = self.stats.seen_purged.saturating_add(purged as u64);
        purged
    }

    /// Plan a round: purge stale seen records, pick up to `fanout` peers
    /// uniformly without replacement and collect pending pushes
    ///
    /// Pending pushes stay queued until [`round_delivered`](Self::round_delivered).
    pub fn plan_round<R: Rng + ?Sized>(&mut self, rng: &mut R, now: DateTime<Utc>) -> RoundPlan {
        self.stats.rounds = self.stats.rounds.saturating_add(1);
        self.purge_seen(now);

        if self.pending.is_empty() || self.peers.is_empty() {
            return RoundPlan::default();
        }

        let peers: Vec<NodeId> = self.peers.iter().cloned().collect();
        let targets: Vec<NodeId> = peers
            .choose_multiple(rng, self.config.fanout.min(peers.len()))
            .cloned()
            .collect();

        let messages = self
            .pending
            .iter()
            .filter_map(|(key, ttl)| {
                let entry = self.entries.get(key)?;
                Some(GossipMessage::from_entry(entry, *ttl))
            })
            .collect();

        RoundPlan { targets, messages }
    }

    /// Record how many pushes of the last plan were handed to the transport
    ///
    /// Pending pushes are cleared once at least one peer took them and kept
    /// for the next round otherwise.
    pub fn round_delivered(&mut self, delivered: usize) {
        self.stats.messages_sent = self.stats.messages_sent.saturating_add(delivered as u64);
        if delivered > 0 {
            self.pending.clear();
        }
    }

    pub fn add_peer(&mut self, peer: NodeId) -> bool {
        if peer == self.node_id {
            return false;
        }
        self.peers.insert(peer)
    }

    pub fn remove_peer(&mut self, peer: &NodeId) -> bool {
        self.peers.remove(peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = &NodeId> {
        self.peers.iter()
    }

    pub fn get(&self, key: &str) -> Option<&GossipEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &GossipEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn stats(&self) -> &GossipStats {
        &self.stats
    }

    pub(crate) fn record_subscriber_failure(&mut self) {
        self.stats.subscriber_failures = self.stats.subscriber_failures.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn state(name: &str) -> GossipState {
        GossipState::new(NodeId::new_unchecked(name), GossipConfig::default())
    }

    fn message(key: &str, version: u64, ttl: u32, timestamp: DateTime<Utc>) -> GossipMessage {
        let origin = NodeId::new_unchecked("node-z");
        GossipMessage {
            id: message_id(&origin, key, version),
            key: key.to_string(),
            value: json!(version),
            version,
            origin,
            timestamp,
            ttl,
        }
    }

    #[test]
    fn test_spread_auto_increments_version() {
        let mut gossip = state("node-a");
        let now = Utc::now();

        let first = gossip.spread("x", json!(1), None, now).unwrap().unwrap();
        let second = gossip.spread("x", json!(2), None, now).unwrap().unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(gossip.get("x").map(|e| &e.value), Some(&json!(2)));
    }

    #[test]
    fn test_spread_rejects_dominated_version() {
        let mut gossip = state("node-a");
        let now = Utc::now();

        gossip.spread("x", json!("new"), Some(5), now).unwrap();
        assert!(gossip.spread("x", json!("old"), Some(5), now).unwrap().is_none());
        assert!(gossip.spread("x", json!("old"), Some(3), now).unwrap().is_none());
        assert_eq!(gossip.get("x").map(|e| e.version), Some(5));
    }

    #[test]
    fn test_receive_rejections() {
        let mut gossip = state("node-a");
        let now = Utc::now();

        assert_eq!(
            gossip.receive(message("x", 1, 0, now), now),
            Err(Rejection::TtlExhausted)
        );
        assert_eq!(
            gossip.receive(message("x", 1, 3, now - Duration::seconds(61)), now),
            Err(Rejection::Expired)
        );

        assert!(gossip.receive(message("x", 2, 3, now), now).is_ok());
        assert_eq!(
            gossip.receive(message("x", 2, 3, now), now),
            Err(Rejection::Duplicate)
        );
        assert_eq!(
            gossip.receive(message("x", 1, 3, now), now),
            Err(Rejection::Superseded)
        );

        let stats = gossip.stats();
        assert_eq!(stats.messages_received, 5);
        assert_eq!(stats.messages_rejected, 4);
        assert_eq!(stats.updates_applied, 1);
    }

    #[test]
    fn test_capacity_limits_new_keys_only() {
        let mut gossip = GossipState::new(
            NodeId::new_unchecked("node-a"),
            GossipConfig {
                max_entries: 1,
                ..Default::default()
            },
        );
        let now = Utc::now();

        gossip.spread("a", json!(1), None, now).unwrap();
        assert!(matches!(
            gossip.spread("b", json!(1), None, now),
            Err(GossipError::CapacityExceeded { max: 1 })
        ));
        assert!(gossip.spread("a", json!(2), None, now).unwrap().is_some());
        assert_eq!(
            gossip.receive(message("c", 1, 3, now), now),
            Err(Rejection::CapacityExceeded)
        );
    }

    #[test]
    fn test_forwarding_budget() {
        let mut gossip = state("node-a");
        gossip.add_peer(NodeId::new_unchecked("node-b"));
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(1);

        gossip.receive(message("last-hop", 1, 1, now), now).unwrap();
        gossip.receive(message("relay", 1, 4, now), now).unwrap();
        gossip.spread("local", json!(true), None, now).unwrap();

        let plan = gossip.plan_round(&mut rng, now);
        let ttl_of = |key: &str| plan.messages.iter().find(|m| m.key == key).map(|m| m.ttl);

        assert_eq!(plan.targets, vec![NodeId::new_unchecked("node-b")]);
        assert_eq!(ttl_of("last-hop"), None);
        assert_eq!(ttl_of("relay"), Some(3));
        assert_eq!(ttl_of("local"), Some(5));

        let relay = plan.messages.iter().find(|m| m.key == "relay").unwrap();
        assert_eq!(relay.id, message_id(&NodeId::new_unchecked("node-z"), "relay", 1));
    }

    #[test]
    fn test_round_fanout_without_replacement() {
        let mut gossip = state("node-a");
        for i in 0..10 {
            gossip.add_peer(NodeId::new_unchecked(format!("peer-{i}")));
        }
        assert!(!gossip.add_peer(NodeId::new_unchecked("node-a")));
        gossip.spread("x", json!(1), None, Utc::now()).unwrap();

        let mut rng = StdRng::seed_from_u64(9);
        let plan = gossip.plan_round(&mut rng, Utc::now());

        let unique: BTreeSet<_> = plan.targets.iter().collect();
        assert_eq!(plan.targets.len(), 3);
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_pending_kept_until_delivered() {
        let mut gossip = state("node-a");
        gossip.add_peer(NodeId::new_unchecked("node-b"));
        gossip.spread("x", json!(1), None, Utc::now()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);

        gossip.plan_round(&mut rng, Utc::now());
        gossip.round_delivered(0);
        assert_eq!(gossip.pending_len(), 1);

        gossip.plan_round(&mut rng, Utc::now());
        gossip.round_delivered(1);
        assert_eq!(gossip.pending_len(), 0);
        assert_eq!(gossip.stats().messages_sent, 1);

        let empty = gossip.plan_round(&mut rng, Utc::now());
        assert!(empty.targets.is_empty());
    }

    #[test]
    fn test_seen_records_purged_after_retention() {
        let mut gossip = state("node-a");
        let start = Utc::now();

        gossip.receive(message("x", 1, 3, start), start).unwrap();
        assert_eq!(gossip.seen_len(), 1);

        assert_eq!(gossip.purge_seen(start + Duration::seconds(30)), 0);
        assert_eq!(gossip.purge_seen(start + Duration::seconds(61)), 1);
        assert_eq!(gossip.stats().seen_purged, 1);
    }
}
