//! # ELEX Gossip
//!
//! Push-style epidemic replication of key/value state across the agent
//! population. Conflicts resolve by version dominance: only a strictly
//! higher version replaces a stored entry, so delivery order never affects
//! what replicas converge to. Duplicate suppression uses seen-message
//! records, and every message carries a hop budget (`ttl`) and an origin
//! timestamp checked against the expiry window.

pub mod config;
pub mod error;
pub mod message;
pub mod state;
pub mod store;

pub use config::GossipConfig;
pub use error::{GossipError, GossipResult};
pub use message::{GossipEntry, GossipMessage, GossipPush, message_id};
pub use state::{GossipState, GossipStats, Rejection, RoundPlan};
pub use store::{GossipStore, GossipStoreBuilder, SubscriberError, SubscriptionId};
