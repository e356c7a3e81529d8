//! The error payload that rides the error channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error produced by a user handler, transported back to the controller as a
/// textual payload on the error channel.
///
/// Every handler in the capability set returns this one type; job failures,
/// worker-side codec failures, and trapped delivery-handler failures all
/// surface as a `JobError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct JobError {
    /// Human-readable cause.
    pub message: String,
}

impl JobError {
    /// Create a new job error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Encode for the wire. A zero-length payload means "no error".
    pub fn to_payload(&self) -> Vec<u8> {
        self.message.clone().into_bytes()
    }

    /// Decode from a non-empty wire payload, tolerating invalid UTF-8.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            message: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let err = JobError::new("alignment failed on contig 7");
        let payload = err.to_payload();
        assert!(!payload.is_empty());
        assert_eq!(JobError::from_payload(&payload), err);
    }

    #[test]
    fn test_lossy_decode() {
        let err = JobError::from_payload(&[0xff, 0xfe, b'x']);
        assert!(err.message.ends_with('x'));
    }

    #[test]
    fn test_display() {
        let err: JobError = "boom".into();
        assert_eq!(err.to_string(), "boom");
    }
}
