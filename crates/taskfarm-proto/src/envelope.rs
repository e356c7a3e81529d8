//! Wire envelope for socket transports.
//!
//! Point-to-point messages travel between ranks as a fixed header followed by
//! the payload: `[source (4 bytes BE)][tag (4 bytes BE)][kind (1 byte)]`
//! `[length (4 bytes BE)][payload]`. The header carries enough to route the
//! message into a tag/source-matched mailbox on the receiving rank.

use bytes::Bytes;

use crate::error::Error;
use crate::tag::Tag;

/// Maximum payload size (16 MB).
///
/// The header's length field is trusted when sizing the receive buffer, so
/// this bound caps how much memory a single declared length can demand from
/// the receiving rank. It is enforced on both encode and decode.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Size of the envelope header in bytes.
pub const HEADER_SIZE: usize = 13;

/// Element kind of a typed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKind {
    /// 32-bit signed integers.
    Int32,
    /// 8-bit bytes (characters).
    Byte,
    /// 64-bit floats.
    Float64,
}

impl ElemKind {
    /// Size of one element of this kind in bytes.
    pub fn elem_size(self) -> usize {
        match self {
            ElemKind::Int32 => 4,
            ElemKind::Byte => 1,
            ElemKind::Float64 => 8,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            ElemKind::Int32 => 0,
            ElemKind::Byte => 1,
            ElemKind::Float64 => 2,
        }
    }

    fn from_wire(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(ElemKind::Int32),
            1 => Ok(ElemKind::Byte),
            2 => Ok(ElemKind::Float64),
            other => Err(Error::InvalidMessage(format!("unknown element kind {other}"))),
        }
    }
}

impl std::fmt::Display for ElemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElemKind::Int32 => write!(f, "i32"),
            ElemKind::Byte => write!(f, "u8"),
            ElemKind::Float64 => write!(f, "f64"),
        }
    }
}

/// One routed message: source rank, logical tag, element kind, raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Rank of the sending process.
    pub source: u32,
    /// Logical channel the message travels under.
    pub tag: Tag,
    /// Element kind the payload was sent as.
    pub kind: ElemKind,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(source: u32, tag: Tag, kind: ElemKind, payload: impl Into<Bytes>) -> Self {
        Self {
            source,
            tag,
            kind,
            payload: payload.into(),
        }
    }

    /// Number of elements in the payload.
    pub fn elem_count(&self) -> usize {
        self.payload.len() / self.kind.elem_size()
    }
}

/// Encode an envelope to wire bytes.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, Error> {
    if envelope.payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge {
            size: envelope.payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut wire = Vec::with_capacity(HEADER_SIZE + envelope.payload.len());
    wire.extend_from_slice(&envelope.source.to_be_bytes());
    wire.extend_from_slice(&envelope.tag.value().to_be_bytes());
    wire.push(envelope.kind.to_wire());
    wire.extend_from_slice(&(envelope.payload.len() as u32).to_be_bytes());
    wire.extend_from_slice(&envelope.payload);
    Ok(wire)
}

/// Decode an envelope from wire bytes.
///
/// The buffer must contain exactly one envelope; trailing garbage is rejected.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope, Error> {
    if data.len() < HEADER_SIZE {
        return Err(Error::InvalidMessage(format!(
            "buffer too short for envelope header: {} < {}",
            data.len(),
            HEADER_SIZE
        )));
    }

    let source = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let tag = Tag::from_raw(i32::from_be_bytes([data[4], data[5], data[6], data[7]]))?;
    let kind = ElemKind::from_wire(data[8])?;
    let len = u32::from_be_bytes([data[9], data[10], data[11], data[12]]) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if data.len() != HEADER_SIZE + len {
        return Err(Error::InvalidMessage(format!(
            "envelope length mismatch: declared {}, have {}",
            len,
            data.len() - HEADER_SIZE
        )));
    }
    if len % kind.elem_size() != 0 {
        return Err(Error::InvalidMessage(format!(
            "payload of {len} bytes is not a whole number of {kind} elements"
        )));
    }

    Ok(Envelope {
        source,
        tag,
        kind,
        payload: Bytes::copy_from_slice(&data[HEADER_SIZE..]),
    })
}
