//! Gossip payloads

use chrono::{DateTime, Utc};
use elex_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored value for one key; only the highest version is retained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipEntry {
    pub key: String,
    pub value: Value,
    pub version: u64,
    pub origin: NodeId,
    pub timestamp: DateTime<Utc>,
}

/// One update in flight
///
/// `id` identifies the update (origin, key, version) across every hop;
/// `ttl` is the hop budget remaining at the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    pub id: String,
    pub key: String,
    pub value: Value,
    pub version: u64,
    pub origin: NodeId,
    pub timestamp: DateTime<Utc>,
    pub ttl: u32,
}

impl GossipMessage {
    /// Build the message for `entry` with hop budget `ttl`
    pub fn from_entry(entry: &GossipEntry, ttl: u32) -> Self {
        Self {
            id: message_id(&entry.origin, &entry.key, entry.version),
            key: entry.key.clone(),
            value: entry.value.clone(),
            version: entry.version,
            origin: entry.origin.clone(),
            timestamp: entry.timestamp,
            ttl,
        }
    }

    /// Stored form of the update
    pub fn to_entry(&self) -> GossipEntry {
        GossipEntry {
            key: self.key.clone(),
            value: self.value.clone(),
            version: self.version,
            origin: self.origin.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Batch of updates pushed to one peer in a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipPush {
    pub from: NodeId,
    pub messages: Vec<GossipMessage>,
}

/// Identifier shared by every copy of one update
///
/// Origin and key are length-prefixed; both may contain `:` themselves.
pub fn message_id(origin: &NodeId, key: &str, version: u64) -> String {
    let origin = origin.as_str();
    format!("{}:{origin}:{}:{key}:{version}", origin.len(), key.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_id_is_stable_across_hops() {
        let entry = GossipEntry {
            key: "agent:a1".to_string(),
            value: json!({"present": true}),
            version: 4,
            origin: NodeId::new_unchecked("node-a"),
            timestamp: Utc::now(),
        };

        let first_hop = GossipMessage::from_entry(&entry, 5);
        let second_hop = GossipMessage::from_entry(&first_hop.to_entry(), 4);

        assert_eq!(first_hop.id, "6:node-a:8:agent:a1:4");
        assert_eq!(first_hop.id, second_hop.id);
        assert_eq!(second_hop.to_entry(), entry);
    }

    #[test]
    fn test_message_id_separates_colons_in_origin_and_key() {
        let a = message_id(&NodeId::new_unchecked("node:a"), "b", 1);
        let b = message_id(&NodeId::new_unchecked("node"), "a:b", 1);
        assert_ne!(a, b);

        let c = message_id(&NodeId::new_unchecked("n"), "k:1", 2);
        let d = message_id(&NodeId::new_unchecked("n"), "k", 12);
        assert_ne!(c, d);
    }
}
