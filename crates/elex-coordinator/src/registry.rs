//! Authoritative agent registry

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use elex_core::{AgentId, Category, FajCode};
use serde::{Deserialize, Serialize};

/// A registered agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub faj_code: FajCode,
    pub category: Category,
    pub embedding: Vec<f32>,
    /// Set on every heartbeat
    pub healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(
        agent_id: AgentId,
        faj_code: FajCode,
        category: Category,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id,
            faj_code,
            category,
            embedding,
            healthy: true,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    /// Healthy and heard from within `timeout` of `now`
    pub fn is_healthy_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.healthy && now.signed_duration_since(self.last_heartbeat) <= timeout
    }
}

/// Agent records with a per-category index
///
/// An agent id belongs to at most one category set at a time.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    records: HashMap<AgentId, AgentRecord>,
    by_category: HashMap<Category, BTreeSet<AgentId>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record; returns the replaced record
    pub fn insert(&mut self, record: AgentRecord) -> Option<AgentRecord> {
        let previous = self.remove(&record.agent_id);
        self.by_category
            .entry(record.category.clone())
            .or_default()
            .insert(record.agent_id.clone());
        self.records.insert(record.agent_id.clone(), record);
        previous
    }

    pub fn remove(&mut self, agent_id: &AgentId) -> Option<AgentRecord> {
        let record = self.records.remove(agent_id)?;
        if let Some(members) = self.by_category.get_mut(&record.category) {
            members.remove(agent_id);
            if members.is_empty() {
                self.by_category.remove(&record.category);
            }
        }
        Some(record)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<&AgentRecord> {
        self.records.get(agent_id)
    }

    pub fn get_mut(&mut self, agent_id: &AgentId) -> Option<&mut AgentRecord> {
        self.records.get_mut(agent_id)
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.records.contains_key(agent_id)
    }

    /// Ids registered under `category`, sorted
    pub fn in_category(&self, category: &Category) -> Vec<AgentId> {
        self.by_category
            .get(category)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn category_count(&self, category: &Category) -> usize {
        self.by_category.get(category).map_or(0, BTreeSet::len)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &AgentRecord> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, category: &str, now: DateTime<Utc>) -> AgentRecord {
        AgentRecord::new(
            AgentId::new_unchecked(id),
            FajCode::new_unchecked("FAJ 121 3094"),
            Category::new_unchecked(category),
            vec![1.0, 0.0],
            now,
        )
    }

    #[test]
    fn test_insert_indexes_by_category() {
        let now = Utc::now();
        let mut registry = AgentRegistry::new();
        assert!(registry.insert(record("a", "energy", now)).is_none());
        registry.insert(record("b", "energy", now));
        registry.insert(record("c", "mobility", now));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.category_count(&Category::new_unchecked("energy")), 2);
        assert_eq!(
            registry.in_category(&Category::new_unchecked("energy")),
            vec![AgentId::new_unchecked("a"), AgentId::new_unchecked("b")]
        );
    }

    #[test]
    fn test_reinsert_moves_between_categories() {
        let now = Utc::now();
        let mut registry = AgentRegistry::new();
        registry.insert(record("a", "energy", now));

        let previous = registry.insert(record("a", "mobility", now)).unwrap();
        assert_eq!(previous.category.as_str(), "energy");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.category_count(&Category::new_unchecked("energy")), 0);
        assert_eq!(registry.category_count(&Category::new_unchecked("mobility")), 1);
    }

    #[test]
    fn test_remove() {
        let now = Utc::now();
        let mut registry = AgentRegistry::new();
        registry.insert(record("a", "energy", now));

        assert!(registry.remove(&AgentId::new_unchecked("a")).is_some());
        assert!(registry.remove(&AgentId::new_unchecked("a")).is_none());
        assert!(registry.is_empty());
        assert!(registry.in_category(&Category::new_unchecked("energy")).is_empty());
    }

    #[test]
    fn test_health_window() {
        let now = Utc::now();
        let mut agent = record("a", "energy", now);
        let timeout = Duration::seconds(30);

        assert!(agent.is_healthy_at(now + Duration::seconds(30), timeout));
        assert!(!agent.is_healthy_at(now + Duration::seconds(31), timeout));

        agent.healthy = false;
        assert!(!agent.is_healthy_at(now, timeout));
    }
}
