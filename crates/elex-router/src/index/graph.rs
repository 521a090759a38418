//! Navigable small-world graph index
//!
//! A multi-layer proximity graph in the HNSW style. Each node draws a top
//! layer from an exponential distribution; upper layers are sparse express
//! lanes and layer 0 holds every node. Searches descend greedily through
//! the upper layers and run a beam search of width `ef` on layer 0.
//!
//! Candidates found by the graph are re-ranked with the exact cosine score
//! and the shared tie-break. The beam's k-th hit then becomes a threshold
//! for a [`PivotCover`] pass, which scores every vector the beam missed that
//! could still reach it. The result is the one an exact scan would give,
//! whatever shape the graph has. Removal tombstones a node: it keeps
//! routing traffic but is never returned. Small indexes use the exact scan
//! directly.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use elex_core::AgentId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::cover::{PivotCover, unit_vector};
use super::{IdFilter, ScoredId, VectorIndex, top_k};
use crate::config::GraphConfig;
use crate::similarity::{cosine_with_norms, norm};

/// Layer cap; with the default `m` a level this high is never drawn in practice
const MAX_LEVEL: usize = 16;

#[derive(Debug, Clone)]
struct GraphNode {
    id: AgentId,
    embedding: Vec<f32>,
    norm: f32,
    seq: u64,
    neighbors: Vec<Vec<usize>>,
    deleted: bool,
}

impl GraphNode {
    fn level(&self) -> usize {
        self.neighbors.len() - 1
    }
}

/// Slot with its similarity to the current query, ordered by similarity
#[derive(Debug, Clone, Copy)]
struct Candidate {
    similarity: f32,
    slot: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

/// Index backed by a layered proximity graph and a pivot cover
#[derive(Debug)]
pub struct GraphIndex {
    config: GraphConfig,
    nodes: Vec<GraphNode>,
    slots: HashMap<AgentId, usize>,
    entry_point: Option<usize>,
    max_level: usize,
    next_seq: u64,
    rng: StdRng,
    level_mult: f64,
    cover: PivotCover,
}

impl GraphIndex {
    pub fn new(config: GraphConfig) -> Self {
        let level_mult = 1.0 / (config.m.max(2) as f64).ln();
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            nodes: Vec::new(),
            slots: HashMap::new(),
            entry_point: None,
            max_level: 0,
            next_seq: 0,
            level_mult,
            cover: PivotCover::default(),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Removed nodes still present in the graph
    pub fn tombstones(&self) -> usize {
        self.nodes.len() - self.slots.len()
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    fn random_level(&mut self) -> usize {
        // 1 - u lies in (0, 1], keeping ln finite
        let u: f64 = self.rng.random();
        let level = (-(1.0 - u).ln() * self.level_mult).floor();
        (level as usize).min(MAX_LEVEL)
    }

    fn similarity_to(&self, query: &[f32], query_norm: f32, slot: usize) -> f32 {
        let node = &self.nodes[slot];
        cosine_with_norms(query, query_norm, &node.embedding, node.norm)
    }

    fn insert_with_seq(&mut self, id: AgentId, embedding: Vec<f32>, seq: u64) {
        let level = self.random_level();
        let slot = self.nodes.len();
        let node_norm = norm(&embedding);

        self.nodes.push(GraphNode {
            id: id.clone(),
            embedding,
            norm: node_norm,
            seq,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.slots.insert(id, slot);
        self.cover.assign(slot, &self.nodes[slot].embedding, level >= 1);

        let Some(mut entry) = self.entry_point else {
            self.entry_point = Some(slot);
            self.max_level = level;
            return;
        };

        let query = self.nodes[slot].embedding.clone();

        for layer in (level + 1..=self.max_level).rev() {
            entry = self.greedy_closest(&query, node_norm, entry, layer);
        }

        let mut entries = vec![entry];
        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(
                &query,
                node_norm,
                &entries,
                self.config.ef_construction,
                layer,
            );
            let limit = self.max_links(layer);
            let selected: Vec<usize> = found
                .iter()
                .filter(|candidate| candidate.slot != slot)
                .take(limit)
                .map(|candidate| candidate.slot)
                .collect();

            for &neighbor in &selected {
                self.nodes[neighbor].neighbors[layer].push(slot);
                if self.nodes[neighbor].neighbors[layer].len() > limit {
                    self.prune(neighbor, layer, limit);
                }
            }
            self.nodes[slot].neighbors[layer] = selected;
            entries = found.iter().map(|candidate| candidate.slot).collect();
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(slot);
        }
    }

    /// Keep the `limit` links of `slot` on `layer` closest to it
    fn prune(&mut self, slot: usize, layer: usize, limit: usize) {
        let node = &self.nodes[slot];
        let mut scored: Vec<Candidate> = node.neighbors[layer]
            .iter()
            .map(|&other| Candidate {
                similarity: self.similarity_to(&node.embedding, node.norm, other),
                slot: other,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(limit);
        self.nodes[slot].neighbors[layer] = scored.into_iter().map(|c| c.slot).collect();
    }

    fn greedy_closest(&self, query: &[f32], query_norm: f32, start: usize, layer: usize) -> usize {
        let mut current = start;
        let mut best = self.similarity_to(query, query_norm, current);

        loop {
            let mut improved = false;
            for &neighbor in &self.nodes[current].neighbors[layer] {
                let similarity = self.similarity_to(query, query_norm, neighbor);
                if similarity > best {
                    best = similarity;
                    current = neighbor;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search on one layer; returns up to `ef` candidates, best first
    fn search_layer(
        &self,
        query: &[f32],
        query_norm: f32,
        entries: &[usize],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        for &slot in entries {
            if visited.insert(slot) {
                let candidate = Candidate {
                    similarity: self.similarity_to(query, query_norm, slot),
                    slot,
                };
                frontier.push(candidate);
                results.push(Reverse(candidate));
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(current) = frontier.pop() {
            let worst = results.peek().map_or(f32::NEG_INFINITY, |r| r.0.similarity);
            if results.len() >= ef && current.similarity < worst {
                break;
            }

            let Some(links) = self.nodes[current.slot].neighbors.get(layer) else {
                continue;
            };
            for &neighbor in links {
                if !visited.insert(neighbor) {
                    continue;
                }
                let similarity = self.similarity_to(query, query_norm, neighbor);
                let worst = results.peek().map_or(f32::NEG_INFINITY, |r| r.0.similarity);
                if results.len() < ef || similarity > worst {
                    let candidate = Candidate {
                        similarity,
                        slot: neighbor,
                    };
                    frontier.push(candidate);
                    results.push(Reverse(candidate));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        found.sort_by(|a, b| b.cmp(a));
        found
    }

    fn exact_search(&self, query: &[f32], k: usize, filter: Option<IdFilter<'_>>) -> Vec<ScoredId> {
        let query_norm = norm(query);
        let hits = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.deleted)
            .filter(|(_, node)| filter.is_none_or(|allow| allow(&node.id)))
            .map(|(slot, node)| ScoredId {
                id: node.id.clone(),
                similarity: self.similarity_to(query, query_norm, slot),
                seq: node.seq,
            })
            .collect();
        top_k(hits, k)
    }

    fn graph_search(&self, query: &[f32], k: usize, filter: Option<IdFilter<'_>>) -> Vec<ScoredId> {
        let Some(mut entry) = self.entry_point else {
            return Vec::new();
        };
        let query_norm = norm(query);

        for layer in (1..=self.max_level).rev() {
            entry = self.greedy_closest(query, query_norm, entry, layer);
        }

        // Widen the beam for filtered queries, most hits will be discarded
        let widen = if filter.is_some() { 4 } else { 1 };
        let ef = self.config.ef_search.max(k) * widen;
        let found = self.search_layer(query, query_norm, &[entry], ef, 0);

        let mut scored: HashSet<usize> = found.iter().map(|candidate| candidate.slot).collect();
        let hits = top_k(
            found
                .into_iter()
                .filter_map(|candidate| self.hit(candidate.slot, candidate.similarity, filter))
                .collect(),
            k,
        );

        // Anything the beam missed must beat the k-th hit to matter
        let threshold = (hits.len() == k).then(|| hits[k - 1].similarity);
        let query_unit = unit_vector(query);
        let mut missed = Vec::new();
        for slot in self.cover.candidates(query_unit.as_deref(), threshold) {
            if !scored.insert(slot) {
                continue;
            }
            let similarity = self.similarity_to(query, query_norm, slot);
            missed.extend(self.hit(slot, similarity, filter));
        }
        if missed.is_empty() {
            return hits;
        }

        trace!(missed = missed.len(), "Cover pass added graph candidates");
        missed.extend(hits);
        top_k(missed, k)
    }

    fn hit(&self, slot: usize, similarity: f32, filter: Option<IdFilter<'_>>) -> Option<ScoredId> {
        let node = &self.nodes[slot];
        if node.deleted || !filter.is_none_or(|allow| allow(&node.id)) {
            return None;
        }
        Some(ScoredId {
            id: node.id.clone(),
            similarity,
            seq: node.seq,
        })
    }
}

impl VectorIndex for GraphIndex {
    fn insert(&mut self, id: AgentId, embedding: Vec<f32>) {
        self.remove(&id);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert_with_seq(id, embedding, seq);
    }

    fn remove(&mut self, id: &AgentId) -> bool {
        let Some(slot) = self.slots.remove(id) else {
            return false;
        };
        self.nodes[slot].deleted = true;

        if self.slots.is_empty() {
            self.nodes.clear();
            self.cover.clear();
            self.entry_point = None;
            self.max_level = 0;
        } else if self.tombstones() > self.slots.len().max(self.config.exact_threshold) {
            self.rebuild();
        }
        true
    }

    fn search(&self, query: &[f32], k: usize, filter: Option<IdFilter<'_>>) -> Vec<ScoredId> {
        if k == 0 || self.slots.is_empty() {
            return Vec::new();
        }
        if self.slots.len() <= self.config.exact_threshold {
            return self.exact_search(query, k, filter);
        }

        self.graph_search(query, k, filter)
    }

    fn contains(&self, id: &AgentId) -> bool {
        self.slots.contains_key(id)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn rebuild(&mut self) {
        let mut live: Vec<GraphNode> = std::mem::take(&mut self.nodes)
            .into_iter()
            .filter(|node| !node.deleted)
            .collect();
        live.sort_by_key(|node| node.seq);

        self.slots.clear();
        self.cover.clear();
        self.entry_point = None;
        self.max_level = 0;
        self.rng = StdRng::seed_from_u64(self.config.seed);

        let count = live.len();
        for node in live {
            self.insert_with_seq(node.id, node.embedding, node.seq);
        }
        debug!(vectors = count, pivots = self.cover.balls(), "Graph index rebuilt");
    }

    fn kind(&self) -> &'static str {
        "graph"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FlatIndex;

    fn id(i: usize) -> AgentId {
        AgentId::new_unchecked(format!("agent-{i}"))
    }

    /// Deterministic pseudo-random vectors
    fn vectors(count: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| (0..dims).map(|_| rng.random_range(-1.0..1.0)).collect())
            .collect()
    }

    fn small_threshold() -> GraphConfig {
        GraphConfig {
            exact_threshold: 0,
            ..GraphConfig::default()
        }
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let mut index = GraphIndex::new(small_threshold());
        let data = vectors(300, 16, 1);
        for (i, v) in data.iter().enumerate() {
            index.insert(id(i), v.clone());
        }

        for target in [0, 57, 123, 299] {
            let hits = index.search(&data[target], 1, None);
            assert_eq!(hits[0].id, id(target));
            assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        }
    }

    fn ranked(hits: Vec<ScoredId>) -> Vec<(AgentId, f32)> {
        hits.into_iter().map(|h| (h.id, h.similarity)).collect()
    }

    #[test]
    fn test_matches_exact_scan() {
        let mut graph = GraphIndex::new(small_threshold());
        let mut flat = FlatIndex::new();
        let data = vectors(500, 24, 2);
        for (i, v) in data.iter().enumerate() {
            graph.insert(id(i), v.clone());
            flat.insert(id(i), v.clone());
        }

        for query in &vectors(20, 24, 3) {
            assert_eq!(
                ranked(graph.search(query, 10, None)),
                ranked(flat.search(query, 10, None))
            );
        }
    }

    #[test]
    fn test_large_index_matches_exact_scan_across_rebuild() {
        let mut graph = GraphIndex::new(GraphConfig::default());
        let mut flat = FlatIndex::new();
        let data = vectors(600, 64, 11);
        for (i, v) in data.iter().enumerate() {
            graph.insert(id(i), v.clone());
            flat.insert(id(i), v.clone());
        }
        assert!(graph.len() > graph.config().exact_threshold);

        let queries = vectors(30, 64, 12);
        for query in &queries {
            assert_eq!(graph.search(query, 10, None), flat.search(query, 10, None));
        }

        for i in (0..600).step_by(7) {
            graph.remove(&id(i));
            flat.remove(&id(i));
        }
        let before: Vec<_> = queries.iter().map(|q| graph.search(q, 10, None)).collect();
        graph.rebuild();
        assert_eq!(graph.tombstones(), 0);

        for (query, before) in queries.iter().zip(before) {
            let after = graph.search(query, 10, None);
            assert_eq!(after, before);
            assert_eq!(after, flat.search(query, 10, None));
        }
    }

    #[test]
    fn test_filtered_large_index_matches_exact_scan() {
        let mut graph = GraphIndex::new(GraphConfig::default());
        let mut flat = FlatIndex::new();
        for (i, v) in vectors(400, 32, 13).into_iter().enumerate() {
            graph.insert(id(i), v.clone());
            flat.insert(id(i), v);
        }

        let every_fifth = |candidate: &AgentId| {
            candidate
                .as_str()
                .trim_start_matches("agent-")
                .parse::<usize>()
                .is_ok_and(|n| n % 5 == 0)
        };
        for query in &vectors(10, 32, 14) {
            assert_eq!(
                graph.search(query, 8, Some(&every_fifth)),
                flat.search(query, 8, Some(&every_fifth))
            );
        }
    }

    #[test]
    fn test_results_are_sorted_and_deduplicated() {
        let mut index = GraphIndex::new(small_threshold());
        for (i, v) in vectors(400, 8, 4).into_iter().enumerate() {
            index.insert(id(i), v);
        }

        let hits = index.search(&vectors(1, 8, 5)[0], 25, None);
        assert_eq!(hits.len(), 25);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        let unique: HashSet<_> = hits.iter().map(|h| h.id.clone()).collect();
        assert_eq!(unique.len(), 25);
    }

    #[test]
    fn test_removed_vectors_never_returned() {
        let mut index = GraphIndex::new(small_threshold());
        let data = vectors(200, 8, 6);
        for (i, v) in data.iter().enumerate() {
            index.insert(id(i), v.clone());
        }

        assert!(index.remove(&id(10)));
        assert!(!index.contains(&id(10)));
        assert_eq!(index.len(), 199);

        let hits = index.search(&data[10], 20, None);
        assert!(hits.iter().all(|h| h.id != id(10)));
        assert_eq!(hits.len(), 20);
    }

    #[test]
    fn test_sparse_filter_still_finds_every_match() {
        let mut index = GraphIndex::new(small_threshold());
        for (i, v) in vectors(300, 8, 7).into_iter().enumerate() {
            index.insert(id(i), v);
        }

        let rare = |candidate: &AgentId| candidate == &id(3) || candidate == &id(250);
        let hits = index.search(&vectors(1, 8, 8)[0], 5, Some(&rare));
        let mut ids: Vec<_> = hits.into_iter().map(|h| h.id).collect();
        ids.sort();
        assert_eq!(ids, vec![id(250), id(3)]);
    }

    #[test]
    fn test_rebuild_preserves_results() {
        let mut index = GraphIndex::new(small_threshold());
        let data = vectors(300, 8, 9);
        for (i, v) in data.iter().enumerate() {
            index.insert(id(i), v.clone());
        }
        for i in (0..300).step_by(3) {
            index.remove(&id(i));
        }

        let before: Vec<_> = index.search(&data[1], 5, None).into_iter().map(|h| h.id).collect();
        index.rebuild();
        let after: Vec<_> = index.search(&data[1], 5, None).into_iter().map(|h| h.id).collect();

        assert_eq!(index.tombstones(), 0);
        assert_eq!(index.len(), 200);
        assert_eq!(before[0], id(1));
        assert_eq!(after[0], id(1));
    }

    #[test]
    fn test_small_index_uses_exact_scan() {
        let mut index = GraphIndex::new(GraphConfig::default());
        index.insert(id(0), vec![1.0, 0.0]);
        index.insert(id(1), vec![1.0, 0.0]);
        index.insert(id(2), vec![0.0, 1.0]);

        let hits = index.search(&[1.0, 0.0], 3, None);
        let order: Vec<_> = hits.iter().map(|h| h.id.clone()).collect();
        assert_eq!(order, vec![id(0), id(1), id(2)]);
    }
}
