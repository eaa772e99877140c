//! The QoS subsystem's error taxonomy.
//!
//! The subsystem is advisory end to end: no variant here except
//! [`QosError::ConfigurationMissing`] is ever allowed to halt task
//! execution. Everything else is logged at WARN/ERROR by the caller and the
//! triggering operation is skipped or dropped.

use crate::ids::VertexId;
use qos_messaging::TargetWorker;
use thiserror::Error;

/// An error raised somewhere in the QoS subsystem.
#[derive(Error, Debug, Clone)]
pub enum QosError {
    /// A required configuration key was absent. Fatal at plugin
    /// initialization; never surfaced past it.
    #[error("missing required configuration key `{key}`")]
    ConfigurationMissing {
        /// The absent key, e.g. `<plugins>.streaming.qosreporter.aggregationinterval`.
        key: String,
    },

    /// A task tried to register under a `VertexId` that is already
    /// registered with this job's environment.
    #[error("task for vertex {vertex_id} is already registered")]
    AlreadyRegistered {
        /// The duplicate vertex.
        vertex_id: VertexId,
    },

    /// A chain-construct/announce request violated a topology precondition:
    /// some intermediate vertex has more than one output gate, or an edge
    /// on the path is not POINTWISE.
    #[error("invalid chain from {begin} to {end}: {reason}")]
    InvalidChain {
        /// The chain's requested start vertex.
        begin: VertexId,
        /// The chain's requested end vertex.
        end: VertexId,
        /// What made the chain invalid.
        reason: String,
    },

    /// An inbound message carried a kind this subsystem doesn't handle.
    #[error("unknown message kind: {kind}")]
    UnknownMessage {
        /// A short, human-readable description of the unhandled kind.
        kind: String,
    },

    /// An outbound dispatch to a peer worker failed.
    #[error("failed to deliver message to {target}: {reason}")]
    TransportFailure {
        /// The intended recipient.
        target: TargetWorker,
        /// Why delivery failed.
        reason: String,
    },

    /// Graph assembly detected a structural contradiction, e.g. an edge
    /// whose endpoints name different groups than its endpoint gates do.
    /// The offending edge is skipped; assembly otherwise continues.
    #[error("internal invariant violated: {description}")]
    InternalInvariant {
        /// What contradiction was detected.
        description: String,
    },
}

/// Convenience alias for fallible operations in this crate.
pub type QosResult<T> = Result<T, QosError>;
