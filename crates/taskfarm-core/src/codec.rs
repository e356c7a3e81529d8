//! Serialization seam between user payloads and the wire.
//!
//! The coordinator never inspects item or result bytes; everything it ships
//! goes through a [`Codec`]. The default [`JsonCodec`] covers any serde
//! type; [`BytesCodec`] passes raw byte vectors through untouched.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Turning a value into bytes failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Turning bytes back into a value failed.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Converts opaque user values to and from byte strings.
///
/// Implementations must round-trip: `decode(encode(v)) == v`.
pub trait Codec<T> {
    /// Serialize a value.
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a value.
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec over serde, usable with any `Serialize + DeserializeOwned`
/// payload type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Identity codec for payloads that already are byte vectors. Encodes the
/// empty vector as a zero-length byte string.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let codec = JsonCodec;
        let value = vec![("alpha".to_string(), 1u32), ("beta".to_string(), 2)];
        let bytes = codec.encode(&value).unwrap();
        let decoded: Vec<(String, u32)> = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_json_decode_failure() {
        let codec = JsonCodec;
        let result: Result<u64, _> = codec.decode(b"not json");
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_bytes_identity() {
        let codec = BytesCodec;
        let value = vec![0u8, 255, 7];
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(bytes, value);
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_bytes_empty_encodes_to_empty() {
        let codec = BytesCodec;
        let bytes = codec.encode(&Vec::new()).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(codec.decode(&bytes).unwrap(), Vec::<u8>::new());
    }
}
