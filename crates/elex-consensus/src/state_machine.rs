//! Replicated key-value state machine

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;
use crate::log::LogEntry;

/// Deterministic map built by applying committed entries in index order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvStateMachine {
    data: BTreeMap<String, Value>,
    last_applied: u64,
}

impl KvStateMachine {
    /// Create an empty state machine
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the next committed entry, returning the previous value of its key
    ///
    /// Entries at or below `last_applied` are ignored so replays are harmless.
    pub fn apply(&mut self, entry: &LogEntry) -> Option<Value> {
        if entry.index <= self.last_applied {
            return None;
        }
        self.last_applied = entry.index;

        match &entry.command {
            Command::Set { key, value } => self.data.insert(key.clone(), value.clone()),
            Command::Delete { key } => self.data.remove(key),
        }
    }

    /// Committed value of `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Index of the last applied entry
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate keys and values in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }
}
