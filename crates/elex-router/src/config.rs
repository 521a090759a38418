//! Router configuration

use serde::{Deserialize, Serialize};

use crate::error::{RouterError, RouterResult};

/// Index implementation backing the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact linear scan
    #[default]
    Flat,
    /// Navigable small-world graph with exact re-ranking
    Graph,
}

/// Graph index parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Links per node on upper layers; layer 0 keeps `2 * m`
    pub m: usize,
    /// Beam width while inserting
    pub ef_construction: usize,
    /// Beam width while searching
    pub ef_search: usize,
    /// Below this many live vectors queries use the exact scan
    pub exact_threshold: usize,
    /// Seed for layer assignment
    pub seed: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            exact_threshold: 256,
            seed: 0x5EED,
        }
    }
}

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Required embedding length
    pub dimensions: usize,
    pub index: IndexKind,
    pub graph: GraphConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dimensions: 128,
            index: IndexKind::Flat,
            graph: GraphConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Graph-backed configuration with default parameters
    pub fn graph(dimensions: usize) -> Self {
        Self {
            dimensions,
            index: IndexKind::Graph,
            graph: GraphConfig::default(),
        }
    }

    pub fn validate(&self) -> RouterResult<()> {
        if self.dimensions == 0 {
            return Err(RouterError::InvalidConfig(
                "dimensions must be greater than 0".to_string(),
            ));
        }
        if self.index == IndexKind::Graph {
            if self.graph.m < 2 {
                return Err(RouterError::InvalidConfig(
                    "graph.m must be at least 2".to_string(),
                ));
            }
            if self.graph.ef_construction == 0 || self.graph.ef_search == 0 {
                return Err(RouterError::InvalidConfig(
                    "graph ef parameters must be greater than 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}
