//! Query-to-agent routing

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use elex_core::{AgentId, Category, FajCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{IndexKind, RouterConfig};
use crate::error::{RouterError, RouterResult};
use crate::index::{FlatIndex, GraphIndex, ScoredId, VectorIndex};

/// Ranked routing result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedCandidate {
    pub agent_id: AgentId,
    pub faj_code: FajCode,
    pub category: Category,
    pub similarity: f32,
}

/// Aggregate routing statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStats {
    pub calls: u64,
    pub total_latency: Duration,
    pub average_latency: Duration,
}

#[derive(Debug, Clone)]
struct AgentMeta {
    faj_code: FajCode,
    category: Category,
}

/// Top-K cosine routing over registered agent embeddings
pub struct SimilarityRouter {
    config: RouterConfig,
    index: Box<dyn VectorIndex>,
    agents: HashMap<AgentId, AgentMeta>,
    calls: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl SimilarityRouter {
    pub fn new(config: RouterConfig) -> RouterResult<Self> {
        config.validate()?;
        let index: Box<dyn VectorIndex> = match config.index {
            IndexKind::Flat => Box::new(FlatIndex::new()),
            IndexKind::Graph => Box::new(GraphIndex::new(config.graph.clone())),
        };
        Ok(Self::with_index(config, index))
    }

    /// Router over a caller-supplied index implementation
    pub fn with_index(config: RouterConfig, index: Box<dyn VectorIndex>) -> Self {
        Self {
            config,
            index,
            agents: HashMap::new(),
            calls: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn index_kind(&self) -> &'static str {
        self.index.kind()
    }

    fn check_embedding(&self, embedding: &[f32]) -> RouterResult<()> {
        if embedding.len() != self.config.dimensions {
            return Err(RouterError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: embedding.len(),
            });
        }
        if let Some(position) = embedding.iter().position(|v| !v.is_finite()) {
            return Err(RouterError::NonFiniteComponent { position });
        }
        Ok(())
    }

    /// Index an agent; an existing id is replaced
    pub fn add_agent(
        &mut self,
        agent_id: AgentId,
        faj_code: FajCode,
        category: Category,
        embedding: Vec<f32>,
    ) -> RouterResult<()> {
        self.check_embedding(&embedding)?;

        debug!(agent_id = %agent_id, category = %category, "Indexing agent");
        self.index.insert(agent_id.clone(), embedding);
        self.agents.insert(agent_id, AgentMeta { faj_code, category });
        Ok(())
    }

    pub fn remove_agent(&mut self, agent_id: &AgentId) -> bool {
        let removed = self.index.remove(agent_id);
        self.agents.remove(agent_id);
        if removed {
            debug!(agent_id = %agent_id, "Removed agent from index");
        }
        removed
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.index.contains(agent_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Top `k` agents by cosine similarity to `query`
    pub fn route(&self, query: &[f32], k: usize) -> RouterResult<Vec<RoutedCandidate>> {
        self.check_embedding(query)?;
        let started = Instant::now();

        let hits = self.index.search(query, k, None);
        let candidates = self.resolve(hits);

        self.record(started.elapsed());
        Ok(candidates)
    }

    /// Top `k` agents of `category` by cosine similarity to `query`
    pub fn route_to_category(
        &self,
        query: &[f32],
        category: &Category,
        k: usize,
    ) -> RouterResult<Vec<RoutedCandidate>> {
        self.check_embedding(query)?;
        let started = Instant::now();

        let in_category = |id: &AgentId| {
            self.agents
                .get(id)
                .is_some_and(|meta| &meta.category == category)
        };
        let hits = self.index.search(query, k, Some(&in_category));
        let candidates = self.resolve(hits);

        self.record(started.elapsed());
        Ok(candidates)
    }

    /// Reconstruct the index from its live vectors; results are unchanged
    pub fn rebuild(&mut self) {
        self.index.rebuild();
    }

    pub fn stats(&self) -> RouterStats {
        let calls = self.calls.load(Ordering::Relaxed);
        let total = Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed));
        let average = if calls == 0 {
            Duration::ZERO
        } else {
            total / u32::try_from(calls).unwrap_or(u32::MAX)
        };
        RouterStats {
            calls,
            total_latency: total,
            average_latency: average,
        }
    }

    fn resolve(&self, hits: Vec<ScoredId>) -> Vec<RoutedCandidate> {
        hits.into_iter()
            .filter_map(|hit| {
                let meta = self.agents.get(&hit.id)?;
                Some(RoutedCandidate {
                    faj_code: meta.faj_code.clone(),
                    category: meta.category.clone(),
                    agent_id: hit.id,
                    similarity: hit.similarity,
                })
            })
            .collect()
    }

    fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for SimilarityRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityRouter")
            .field("dimensions", &self.config.dimensions)
            .field("index", &self.index.kind())
            .field("agents", &self.agents.len())
            .finish()
    }
}
