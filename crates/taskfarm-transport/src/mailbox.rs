//! Tag- and source-matched message queues.
//!
//! Each rank owns one mailbox. Senders (peer threads or the socket receiver
//! thread) push envelopes; the rank's logical thread blocks in [`Mailbox::recv`]
//! until a message matching its tag and source filter arrives. Matching scans
//! the queue in arrival order, so a wildcard receive resolves ties by arrival
//! time.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use taskfarm_proto::{ElemKind, Envelope, Tag};

use crate::error::Error;
use crate::Source;

struct Inner {
    queue: VecDeque<Envelope>,
    closed: bool,
}

/// A blocking, tag-matched message queue for one rank.
pub struct Mailbox {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Deliver an envelope, waking any blocked receiver.
    pub fn push(&self, envelope: Envelope) {
        let mut inner = self.inner.lock();
        inner.queue.push_back(envelope);
        self.available.notify_all();
    }

    /// Block until an envelope matching `source` and `tag` arrives.
    ///
    /// Returns [`Error::Closed`] once the mailbox is closed and no matching
    /// message remains.
    pub fn recv(&self, source: Source, tag: Tag) -> Result<Envelope, Error> {
        let mut inner = self.inner.lock();
        loop {
            let matched = inner.queue.iter().position(|envelope| {
                envelope.tag == tag && source.matches(envelope.source)
            });
            // remove preserves arrival order for the rest of the queue
            if let Some(envelope) = matched.and_then(|index| inner.queue.remove(index)) {
                return Ok(envelope);
            }
            if inner.closed {
                return Err(Error::Closed);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Close the mailbox, failing all pending and future receives that have
    /// no matching message.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.available.notify_all();
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive an envelope and validate it against a typed buffer.
pub(crate) fn recv_elems(
    mailbox: &Mailbox,
    source: Source,
    tag: Tag,
    kind: ElemKind,
    capacity: usize,
) -> Result<Envelope, Error> {
    let envelope = mailbox.recv(source, tag)?;
    if envelope.kind != kind {
        return Err(Error::TypeMismatch {
            expected: kind,
            found: envelope.kind,
        });
    }
    if envelope.elem_count() > capacity {
        return Err(Error::MessageTooLong {
            got: envelope.elem_count(),
            capacity,
        });
    }
    Ok(envelope)
}

/// Pack `i32` elements into little-endian payload bytes.
pub(crate) fn ints_to_payload(data: &[i32]) -> Bytes {
    let mut payload = Vec::with_capacity(data.len() * 4);
    for value in data {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload.into()
}

/// Pack `f64` elements into little-endian payload bytes.
pub(crate) fn floats_to_payload(data: &[f64]) -> Bytes {
    let mut payload = Vec::with_capacity(data.len() * 8);
    for value in data {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload.into()
}

/// Unpack an `i32` payload into `buf`, returning the element count.
pub(crate) fn payload_to_ints(payload: &[u8], buf: &mut [i32]) -> usize {
    let count = payload.len() / 4;
    for (index, chunk) in payload.chunks_exact(4).enumerate() {
        buf[index] = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    count
}

/// Unpack an `f64` payload into `buf`, returning the element count.
pub(crate) fn payload_to_floats(payload: &[u8], buf: &mut [f64]) -> usize {
    let count = payload.len() / 8;
    for (index, chunk) in payload.chunks_exact(8).enumerate() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        buf[index] = f64::from_le_bytes(raw);
    }
    count
}
