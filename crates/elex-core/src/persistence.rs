//! Snapshot persistence collaborator
//!
//! Components never touch the disk. A consensus group hands its serialisable
//! state to a [`SnapshotStore`] after every durable change and asks for it
//! back on recovery; the store decides where the bytes live.

use std::marker::PhantomData;
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::sync::lock_or_recover;

/// Errors that can occur while saving or loading a snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Snapshot could not be encoded
    #[error("Snapshot serialization failed: {0}")]
    Serialization(String),

    /// Stored snapshot could not be decoded
    #[error("Snapshot deserialization failed: {0}")]
    Deserialization(String),

    /// Backend specific failure
    #[error("Snapshot backend error: {0}")]
    Backend(String),
}

/// Storage for a single, most recent snapshot of type `S`
pub trait SnapshotStore<S>: Send + Sync {
    /// Replace the stored snapshot
    fn save_snapshot(&self, snapshot: &S) -> Result<(), PersistenceError>;

    /// Load the stored snapshot, if any
    fn load_snapshot(&self) -> Result<Option<S>, PersistenceError>;
}

/// Snapshot store that keeps the JSON encoding of the latest snapshot in memory
pub struct InMemorySnapshotStore<S> {
    encoded: Mutex<Option<String>>,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S> InMemorySnapshotStore<S> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            encoded: Mutex::new(None),
            _snapshot: PhantomData,
        }
    }

    /// Raw JSON of the stored snapshot
    pub fn raw(&self) -> Option<String> {
        lock_or_recover(&self.encoded, "snapshot store").clone()
    }
}

impl<S> Default for InMemorySnapshotStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SnapshotStore<S> for InMemorySnapshotStore<S>
where
    S: Serialize + DeserializeOwned,
{
    fn save_snapshot(&self, snapshot: &S) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_string(snapshot)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        *lock_or_recover(&self.encoded, "snapshot store") = Some(encoded);
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<S>, PersistenceError> {
        lock_or_recover(&self.encoded, "snapshot store")
            .as_deref()
            .map(|encoded| {
                serde_json::from_str(encoded)
                    .map_err(|e| PersistenceError::Deserialization(e.to_string()))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct State {
        term: u64,
        voted_for: Option<String>,
    }

    #[test]
    fn test_empty_store_loads_nothing() {
        let store = InMemorySnapshotStore::<State>::new();
        assert_eq!(store.load_snapshot().unwrap(), None);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let store = InMemorySnapshotStore::new();
        store
            .save_snapshot(&State {
                term: 1,
                voted_for: None,
            })
            .unwrap();
        store
            .save_snapshot(&State {
                term: 2,
                voted_for: Some("node-b".to_string()),
            })
            .unwrap();

        let loaded = store.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded.term, 2);
        assert_eq!(loaded.voted_for.as_deref(), Some("node-b"));
        assert!(store.raw().unwrap().contains("node-b"));
    }
}
