//! # ELEX Core
//!
//! Shared building blocks for the swarm coordination layer: validated
//! identifiers, a clock abstraction, cancellable timers, and the narrow
//! collaborator traits (transport, snapshot persistence) the consensus,
//! gossip and coordinator crates are written against.

pub mod clock;
pub mod error;
pub mod identifiers;
pub mod persistence;
pub mod scheduler;
pub mod sync;
pub mod transport;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, elapsed_ms};
pub use error::{CoreError, CoreResult};
pub use identifiers::{AgentId, Category, FajCode, IdValidationError, IdValidator, NodeId};
pub use persistence::{InMemorySnapshotStore, PersistenceError, SnapshotStore};
pub use scheduler::{Scheduler, TimerToken};
pub use transport::{Disconnected, SharedTransport, Transport, TransportError};
