//! # ELEX Router
//!
//! Routes a query embedding to the best-matching agents by cosine
//! similarity. Two index implementations sit behind [`VectorIndex`]: an
//! exact [`FlatIndex`] and a [`GraphIndex`] that searches a proximity
//! graph and then certifies the beam against an angular cover, so both
//! return identical hits for identical contents.
//!
//! ```rust
//! use elex_core::{AgentId, Category, FajCode};
//! use elex_router::{RouterConfig, SimilarityRouter};
//!
//! let mut router = SimilarityRouter::new(RouterConfig { dimensions: 2, ..Default::default() })?;
//! router.add_agent(
//!     AgentId::parse("agent-1")?,
//!     FajCode::parse("FAJ 121 3094")?,
//!     Category::parse("energy")?,
//!     vec![1.0, 0.0],
//! )?;
//!
//! let best = router.route(&[0.9, 0.1], 1)?;
//! assert_eq!(best[0].agent_id.as_str(), "agent-1");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod router;
pub mod similarity;

pub use config::{GraphConfig, IndexKind, RouterConfig};
pub use error::{RouterError, RouterResult};
pub use index::{FlatIndex, GraphIndex, IdFilter, ScoredId, VectorIndex};
pub use router::{RoutedCandidate, RouterStats, SimilarityRouter};
pub use similarity::{cosine_similarity, dot, norm};
