//! Exact linear-scan index

use std::collections::HashMap;

use elex_core::AgentId;

use super::{IdFilter, ScoredId, VectorIndex, top_k};
use crate::similarity::{cosine_with_norms, norm};

#[derive(Debug, Clone)]
struct FlatEntry {
    id: AgentId,
    embedding: Vec<f32>,
    norm: f32,
    seq: u64,
}

/// Exact index scanning every embedding in insertion order
#[derive(Debug, Default)]
pub struct FlatIndex {
    entries: Vec<FlatEntry>,
    positions: HashMap<AgentId, usize>,
    next_seq: u64,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn reindex_from(&mut self, start: usize) {
        for (position, entry) in self.entries.iter().enumerate().skip(start) {
            self.positions.insert(entry.id.clone(), position);
        }
    }
}

impl VectorIndex for FlatIndex {
    fn insert(&mut self, id: AgentId, embedding: Vec<f32>) {
        self.remove(&id);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.positions.insert(id.clone(), self.entries.len());
        self.entries.push(FlatEntry {
            id,
            norm: norm(&embedding),
            embedding,
            seq,
        });
    }

    fn remove(&mut self, id: &AgentId) -> bool {
        let Some(position) = self.positions.remove(id) else {
            return false;
        };
        self.entries.remove(position);
        self.reindex_from(position);
        true
    }

    fn search(&self, query: &[f32], k: usize, filter: Option<IdFilter<'_>>) -> Vec<ScoredId> {
        if k == 0 {
            return Vec::new();
        }
        let query_norm = norm(query);

        let hits = self
            .entries
            .iter()
            .filter(|entry| filter.is_none_or(|allow| allow(&entry.id)))
            .map(|entry| ScoredId {
                id: entry.id.clone(),
                similarity: cosine_with_norms(query, query_norm, &entry.embedding, entry.norm),
                seq: entry.seq,
            })
            .collect();

        top_k(hits, k)
    }

    fn contains(&self, id: &AgentId) -> bool {
        self.positions.contains_key(id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn rebuild(&mut self) {
        self.positions.clear();
        self.reindex_from(0);
    }

    fn kind(&self) -> &'static str {
        "flat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> AgentId {
        AgentId::new_unchecked(name)
    }

    #[test]
    fn test_exact_ranking() {
        let mut index = FlatIndex::new();
        index.insert(id("east"), vec![1.0, 0.0]);
        index.insert(id("north"), vec![0.0, 1.0]);
        index.insert(id("north-east"), vec![1.0, 1.0]);

        let hits = index.search(&[1.0, 0.2], 3, None);
        let order: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(order, vec!["east", "north-east", "north"]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = FlatIndex::new();
        index.insert(id("first"), vec![1.0, 0.0]);
        index.insert(id("second"), vec![2.0, 0.0]);
        index.insert(id("third"), vec![3.0, 0.0]);

        let hits = index.search(&[1.0, 0.0], 3, None);
        let order: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_reinsert_moves_to_end() {
        let mut index = FlatIndex::new();
        index.insert(id("a"), vec![1.0, 0.0]);
        index.insert(id("b"), vec![1.0, 0.0]);
        index.insert(id("a"), vec![1.0, 0.0]);

        assert_eq!(index.len(), 2);
        let hits = index.search(&[1.0, 0.0], 2, None);
        assert_eq!(hits[0].id, id("b"));
        assert_eq!(hits[1].id, id("a"));
    }

    #[test]
    fn test_remove_and_filter() {
        let mut index = FlatIndex::new();
        index.insert(id("a"), vec![1.0, 0.0]);
        index.insert(id("b"), vec![0.9, 0.1]);
        index.insert(id("c"), vec![0.0, 1.0]);

        assert!(index.remove(&id("a")));
        assert!(!index.remove(&id("a")));
        assert!(index.contains(&id("c")));

        let only_c = |candidate: &AgentId| candidate.as_str() == "c";
        let hits = index.search(&[1.0, 0.0], 5, Some(&only_c));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id("c"));
        assert!(index.search(&[1.0, 0.0], 0, None).is_empty());
    }
}
