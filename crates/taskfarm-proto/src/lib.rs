//! Taskfarm protocol types.
//!
//! This crate defines the wire-level vocabulary shared by the job-farming
//! coordinator and its transports:
//!
//! - [`tag`] - Logical channel tags and the reserved control-channel block
//! - [`envelope`] - The socket wire format for routed messages
//! - [`job_error`] - The textual error payload returned by user handlers
//! - [`error`] - Protocol error types
//!
//! User payloads stay opaque at this layer; the coordinator's codec turns
//! them into byte strings before they reach an envelope.

pub mod envelope;
pub mod error;
pub mod job_error;
pub mod tag;

pub use envelope::{decode_envelope, encode_envelope, ElemKind, Envelope, MAX_MESSAGE_SIZE};
pub use error::Error;
pub use job_error::JobError;
pub use tag::Tag;

/// Control-plane value on [`Tag::DATA_AVAILABLE`]: a work item follows.
pub const WORK_FOLLOWS: i32 = 1;

/// Control-plane value on [`Tag::DATA_AVAILABLE`]: terminate.
pub const SHUTDOWN: i32 = 0;
