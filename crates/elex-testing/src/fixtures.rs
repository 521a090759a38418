//! Embedding and identifier fixtures

use elex_core::{AgentId, Category, FajCode, NodeId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reference embedding length
pub const DEFAULT_DIMENSIONS: usize = 128;

/// One-hot vector along `axis`
pub fn axis_embedding(dimensions: usize, axis: usize) -> Vec<f32> {
    let mut embedding = vec![0.0; dimensions];
    if let Some(component) = embedding.get_mut(axis) {
        *component = 1.0;
    }
    embedding
}

/// `count` reproducible embeddings with components in `[-1, 1)`
pub fn seeded_embeddings(count: usize, dimensions: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimensions).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

/// `base` nudged towards `towards` by `weight` in `[0, 1]`
pub fn blend(base: &[f32], towards: &[f32], weight: f32) -> Vec<f32> {
    base.iter()
        .zip(towards)
        .map(|(a, b)| a * (1.0 - weight) + b * weight)
        .collect()
}

pub fn agent_id(n: usize) -> AgentId {
    AgentId::new_unchecked(format!("agent-{n}"))
}

pub fn node_id(n: usize) -> NodeId {
    NodeId::new_unchecked(format!("node-{n}"))
}

pub fn category(name: &str) -> Category {
    Category::new_unchecked(name)
}

/// Feature code in the `FAJ xxx yyyy` shape
pub fn faj_code(n: usize) -> FajCode {
    FajCode::new_unchecked(format!("FAJ {} {:04}", 100 + n / 10_000, n % 10_000))
}
