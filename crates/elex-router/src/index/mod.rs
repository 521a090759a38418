//! Vector index implementations
//!
//! Every index scores with [`cosine_similarity`](crate::similarity::cosine_similarity)
//! and ranks by descending similarity, breaking ties by insertion order, so
//! swapping the index never changes what a query returns for the same
//! contents.

use std::cmp::Ordering;

use elex_core::AgentId;

mod cover;
mod flat;
mod graph;

pub use flat::FlatIndex;
pub use graph::GraphIndex;

/// Predicate restricting which ids may be returned
pub type IdFilter<'a> = &'a dyn Fn(&AgentId) -> bool;

/// A scored index hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: AgentId,
    pub similarity: f32,
    /// Insertion sequence used for tie-breaking
    pub seq: u64,
}

/// Storage and top-K search over agent embeddings
///
/// Embeddings handed to an index are already validated for length and
/// finiteness.
pub trait VectorIndex: Send + Sync {
    /// Insert `embedding` under `id`; an existing id is replaced and moves
    /// to the end of the insertion order
    fn insert(&mut self, id: AgentId, embedding: Vec<f32>);

    /// Remove `id`; returns whether it was present
    fn remove(&mut self, id: &AgentId) -> bool;

    /// Top `k` hits for `query`, optionally restricted by `filter`
    fn search(&self, query: &[f32], k: usize, filter: Option<IdFilter<'_>>) -> Vec<ScoredId>;

    fn contains(&self, id: &AgentId) -> bool;

    /// Number of live vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconstruct internal structures from the live vectors
    fn rebuild(&mut self);

    /// Short name for logs and metrics
    fn kind(&self) -> &'static str;
}

/// Descending similarity, then ascending insertion sequence
pub(crate) fn rank(a: &ScoredId, b: &ScoredId) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Sort hits into rank order and keep the first `k`
pub(crate) fn top_k(mut hits: Vec<ScoredId>, k: usize) -> Vec<ScoredId> {
    hits.sort_by(rank);
    hits.truncate(k);
    hits
}
