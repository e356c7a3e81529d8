//! Variable-length frames over the transport's fixed-count primitives.
//!
//! A frame is two underlying messages sharing one logical tag: a single
//! `i32` length on [`Tag::MESSAGE_LENGTH`], then exactly that many byte
//! elements on the logical tag. The receive side resolves the true source
//! from the length probe (which may use a wildcard) and pins the payload
//! receive to it, so two frames from different senders cannot interleave.
//!
//! Zero-length payloads are sent and received like any other; a receiver of
//! a zero-length frame never waits for data that is not coming.

use taskfarm_proto::Tag;
use taskfarm_transport::{Rank, Source, Transport};

use crate::error::Error;

/// Send `payload` to `dest` as a frame under `tag`.
pub fn send_frame<T>(
    transport: &T,
    dest: Rank,
    tag: Tag,
    payload: &[u8],
    max_len: usize,
) -> Result<(), Error>
where
    T: Transport + ?Sized,
{
    let bound = max_len.min(i32::MAX as usize);
    if payload.len() > bound {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            max: bound,
        });
    }

    transport.send_ints(&[payload.len() as i32], dest, Tag::MESSAGE_LENGTH)?;
    transport.send_bytes(payload, dest, tag)?;
    Ok(())
}

/// Receive one frame under `tag` from `source`.
///
/// Returns the resolved sender rank and the payload. `source` may be
/// [`Source::Any`]; the payload receive is always pinned to the rank the
/// length probe arrived from.
pub fn recv_frame<T>(
    transport: &T,
    source: Source,
    tag: Tag,
    max_len: usize,
) -> Result<(Rank, Vec<u8>), Error>
where
    T: Transport + ?Sized,
{
    let mut length = [0i32; 1];
    let probe = transport.recv_ints(&mut length, source, Tag::MESSAGE_LENGTH)?;
    if probe.len != 1 {
        return Err(Error::FrameTruncated(format!(
            "length probe carried {} integers, expected 1",
            probe.len
        )));
    }
    if length[0] < 0 {
        return Err(Error::FrameTruncated(format!(
            "declared negative length {}",
            length[0]
        )));
    }

    let declared = length[0] as usize;
    if declared > max_len {
        return Err(Error::FrameTooLarge {
            size: declared,
            max: max_len,
        });
    }

    let mut payload = vec![0u8; declared];
    let status = transport.recv_bytes(&mut payload, Source::Rank(probe.source), tag)?;
    if status.len != declared {
        return Err(Error::FrameTruncated(format!(
            "expected {declared} bytes, received {}",
            status.len
        )));
    }

    Ok((probe.source, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskfarm_proto::MAX_MESSAGE_SIZE;
    use taskfarm_transport::LocalCluster;

    #[test]
    fn test_frame_roundtrip() {
        LocalCluster::run(2, |transport| {
            if transport.rank() == 0 {
                send_frame(&transport, 1, Tag::MESSAGE_DATA, b"unit of work", MAX_MESSAGE_SIZE)
                    .unwrap();
            } else {
                let (source, payload) =
                    recv_frame(&transport, Source::Any, Tag::MESSAGE_DATA, MAX_MESSAGE_SIZE)
                        .unwrap();
                assert_eq!(source, 0);
                assert_eq!(payload, b"unit of work");
            }
        })
        .unwrap();
    }

    #[test]
    fn test_zero_length_frame() {
        LocalCluster::run(2, |transport| {
            if transport.rank() == 0 {
                send_frame(&transport, 1, Tag::MESSAGE_ERROR, &[], MAX_MESSAGE_SIZE).unwrap();
            } else {
                let (source, payload) =
                    recv_frame(&transport, Source::Rank(0), Tag::MESSAGE_ERROR, MAX_MESSAGE_SIZE)
                        .unwrap();
                assert_eq!(source, 0);
                assert!(payload.is_empty());
            }
        })
        .unwrap();
    }

    #[test]
    fn test_send_frame_too_large() {
        LocalCluster::run(1, |transport| {
            let result = send_frame(&transport, 0, Tag::MESSAGE_DATA, &[0u8; 32], 16);
            assert!(matches!(result, Err(Error::FrameTooLarge { size: 32, max: 16 })));
        })
        .unwrap();
    }

    #[test]
    fn test_recv_frame_over_limit() {
        LocalCluster::run(2, |transport| {
            if transport.rank() == 0 {
                send_frame(&transport, 1, Tag::MESSAGE_DATA, &[0u8; 64], MAX_MESSAGE_SIZE)
                    .unwrap();
            } else {
                let result = recv_frame(&transport, Source::Rank(0), Tag::MESSAGE_DATA, 16);
                assert!(matches!(result, Err(Error::FrameTooLarge { size: 64, max: 16 })));
            }
        })
        .unwrap();
    }

    #[test]
    fn test_recv_frame_negative_length() {
        LocalCluster::run(2, |transport| {
            if transport.rank() == 0 {
                // A malformed peer declaring a negative length.
                transport.send_ints(&[-4], 1, Tag::MESSAGE_LENGTH).unwrap();
            } else {
                let result = recv_frame(&transport, Source::Rank(0), Tag::MESSAGE_DATA, 1024);
                assert!(matches!(result, Err(Error::FrameTruncated(_))));
            }
        })
        .unwrap();
    }

    #[test]
    fn test_recv_frame_short_payload() {
        LocalCluster::run(2, |transport| {
            if transport.rank() == 0 {
                // Declares ten bytes but delivers three.
                transport.send_ints(&[10], 1, Tag::MESSAGE_LENGTH).unwrap();
                transport.send_bytes(b"abc", 1, Tag::MESSAGE_DATA).unwrap();
            } else {
                let result = recv_frame(&transport, Source::Rank(0), Tag::MESSAGE_DATA, 1024);
                assert!(matches!(result, Err(Error::FrameTruncated(_))));
            }
        })
        .unwrap();
    }

    #[test]
    fn test_interleaved_frames_from_one_sender() {
        LocalCluster::run(2, |transport| {
            if transport.rank() == 0 {
                send_frame(&transport, 1, Tag::MESSAGE_RESULT, b"result", MAX_MESSAGE_SIZE)
                    .unwrap();
                send_frame(&transport, 1, Tag::MESSAGE_ERROR, b"error", MAX_MESSAGE_SIZE)
                    .unwrap();
            } else {
                // Frames must be consumed in send order; the length probes
                // share a tag and are matched first-in first-out.
                let (_, result) =
                    recv_frame(&transport, Source::Rank(0), Tag::MESSAGE_RESULT, MAX_MESSAGE_SIZE)
                        .unwrap();
                let (_, error) =
                    recv_frame(&transport, Source::Rank(0), Tag::MESSAGE_ERROR, MAX_MESSAGE_SIZE)
                        .unwrap();
                assert_eq!(result, b"result");
                assert_eq!(error, b"error");
            }
        })
        .unwrap();
    }
}
