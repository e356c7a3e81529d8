//! Transport error types.

use taskfarm_proto::ElemKind;
use thiserror::Error;

/// Transport-level errors. These are fatal to the rank that observes them.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport was shut down while a receive was pending.
    #[error("transport closed")]
    Closed,

    /// Underlying socket operation failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// A rank outside the process group was addressed.
    #[error("invalid rank {rank} for a cluster of {size}")]
    InvalidRank {
        /// The offending rank.
        rank: u32,
        /// Number of ranks in the cluster.
        size: usize,
    },

    /// A typed receive matched a message of a different element kind.
    #[error("element type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Kind the receiver asked for.
        expected: ElemKind,
        /// Kind the message was sent as.
        found: ElemKind,
    },

    /// An incoming message does not fit the receive buffer.
    #[error("incoming message of {got} elements exceeds buffer capacity {capacity}")]
    MessageTooLong {
        /// Elements in the incoming message.
        got: usize,
        /// Elements the buffer can hold.
        capacity: usize,
    },

    /// Invalid cluster configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire-format error from the protocol layer.
    #[error("protocol error: {0}")]
    Protocol(#[from] taskfarm_proto::Error),
}
