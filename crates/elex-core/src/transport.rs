//! Message delivery collaborator
//!
//! The coordination layer defines message shapes, not wire encodings or
//! sockets. A [`Transport`] is a non-blocking hand-off: `send` enqueues and
//! returns, delivery happens elsewhere, and the receiving side hands the
//! message to the component's `handle_message`. Messages reaching this layer
//! are assumed to be authenticated already.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

use crate::identifiers::NodeId;

/// Errors that can occur while handing a message to the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The destination peer is not known or not reachable
    #[error("Peer unreachable: {0}")]
    Unreachable(NodeId),

    /// The transport has been closed
    #[error("Transport closed")]
    Closed,

    /// Encoding or backend specific failure
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Outbound half of a message transport
pub trait Transport<M>: Send + Sync {
    /// Queue `message` for delivery to `to`
    fn send(&self, to: &NodeId, message: M) -> Result<(), TransportError>;

    /// Queue `message` for every peer the transport knows; returns how many
    /// deliveries were queued
    fn broadcast(&self, message: M) -> Result<usize, TransportError>;
}

/// Shared transport handle
pub type SharedTransport<M> = Arc<dyn Transport<M>>;

/// Transport that reaches nobody, used by single-node deployments
pub struct Disconnected<M> {
    _message: PhantomData<fn(M)>,
}

impl<M> Disconnected<M> {
    /// Create a disconnected transport
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<M> Default for Disconnected<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for Disconnected<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Disconnected")
    }
}

impl<M> Transport<M> for Disconnected<M> {
    fn send(&self, to: &NodeId, _message: M) -> Result<(), TransportError> {
        Err(TransportError::Unreachable(to.clone()))
    }

    fn broadcast(&self, _message: M) -> Result<usize, TransportError> {
        Ok(0)
    }
}
