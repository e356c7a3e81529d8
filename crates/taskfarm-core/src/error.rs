//! Core error types.

use thiserror::Error;

use crate::codec::CodecError;

/// Coordinator errors. Apart from [`Error::DeadlineExceeded`], these are
/// fatal to the rank that observes them.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] taskfarm_transport::Error),

    /// Codec failure that could not be confined to a single item.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A frame arrived shorter than its declared length, or declared a
    /// negative length.
    #[error("frame truncated: {0}")]
    FrameTruncated(String),

    /// A frame declared a length above the configured bound.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared payload size.
        size: usize,
        /// The configured maximum.
        max: usize,
    },

    /// The wall-clock limit expired before any item was dispatched.
    #[error("deadline exceeded before any work was dispatched")]
    DeadlineExceeded,

    /// Invalid farm configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
