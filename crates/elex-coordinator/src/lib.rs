//! # ELEX Coordinator
//!
//! The single composition point of the coordination layer. A
//! [`SwarmCoordinator`] owns one consensus group per category, one gossip
//! store and one similarity router, and exposes agent registration,
//! heartbeats, routing and health to the rest of the system.
//!
//! ```rust,no_run
//! use elex_coordinator::{CoordinatorConfig, CoordinatorContext, RoutingQuery, SwarmCoordinator};
//! use elex_core::{AgentId, Category, FajCode, NodeId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = CoordinatorConfig::new(
//!     NodeId::parse("coordinator-1")?,
//!     vec![Category::parse("energy-saving")?],
//! );
//! config.router.dimensions = 3;
//!
//! let coordinator = SwarmCoordinator::new(config, CoordinatorContext::new("elex")?)?;
//! coordinator.initialize()?;
//!
//! coordinator.register_agent(
//!     AgentId::parse("agent-1")?,
//!     FajCode::parse("FAJ 121 3094")?,
//!     Category::parse("energy-saving")?,
//!     vec![0.9, 0.1, 0.0],
//! )?;
//!
//! let best = coordinator.route_query(&RoutingQuery::new(vec![1.0, 0.0, 0.0]))?;
//! assert_eq!(best[0].agent_id.as_str(), "agent-1");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod registry;

pub use config::{CoordinatorConfig, DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_MAX_AGENTS};
pub use context::{CoordinatorContext, SnapshotStoreFactory};
pub use coordinator::{DEFAULT_TOP_K, RoutingQuery, SwarmCoordinator, presence_key};
pub use error::{CoordinatorError, CoordinatorResult};
pub use health::{CategoryStatus, CoordinatorHealth};
pub use registry::{AgentRecord, AgentRegistry};
