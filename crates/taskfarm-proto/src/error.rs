//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A tag value outside the permitted range.
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A payload larger than the wire-level bound.
    #[error("message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Size of the offending payload in bytes.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
}
