//! Gossip configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GossipError, GossipResult};

/// Gossip store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Peers contacted per round
    pub fanout: usize,
    /// Interval between gossip rounds
    pub round_interval_ms: u64,
    /// Messages older than this (by origin timestamp) are dropped
    pub message_expiry_ms: u64,
    /// Hop budget given to locally originated updates
    pub default_ttl: u32,
    /// Maximum number of distinct keys held
    pub max_entries: usize,
    /// How long seen-message records are kept; defaults to the expiry window
    pub seen_retention_ms: Option<u64>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 3,
            round_interval_ms: 1000,
            message_expiry_ms: 60_000,
            default_ttl: 5,
            max_entries: 100_000,
            seen_retention_ms: None,
        }
    }
}

impl GossipConfig {
    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    /// Effective seen-record retention in milliseconds
    pub fn seen_retention_ms(&self) -> u64 {
        self.seen_retention_ms.unwrap_or(self.message_expiry_ms)
    }

    pub fn validate(&self) -> GossipResult<()> {
        if self.fanout == 0 {
            return Err(GossipError::InvalidConfig(
                "fanout must be greater than 0".to_string(),
            ));
        }
        if self.round_interval_ms == 0 {
            return Err(GossipError::InvalidConfig(
                "round_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.message_expiry_ms == 0 {
            return Err(GossipError::InvalidConfig(
                "message_expiry_ms must be greater than 0".to_string(),
            ));
        }
        if self.default_ttl == 0 {
            return Err(GossipError::InvalidConfig(
                "default_ttl must be greater than 0".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(GossipError::InvalidConfig(
                "max_entries must be greater than 0".to_string(),
            ));
        }
        if self.seen_retention_ms() < self.message_expiry_ms {
            // A record purged before its message expires would let a
            // late duplicate through
            return Err(GossipError::InvalidConfig(format!(
                "seen_retention_ms ({}) must be >= message_expiry_ms ({})",
                self.seen_retention_ms(),
                self.message_expiry_ms
            )));
        }
        Ok(())
    }
}
