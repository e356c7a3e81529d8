//! In-process transport: one thread per rank over shared mailboxes.
//!
//! [`LocalCluster`] stands up a full process group inside one OS process.
//! Every rank runs on its own thread and talks to its peers through the
//! mailbox layer, which gives the same blocking, tag-matched semantics as the
//! socket transport. This is the harness used by the multi-rank tests and the
//! single-machine execution mode.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use taskfarm_proto::{ElemKind, Envelope, Tag};

use crate::error::Error;
use crate::mailbox::{
    floats_to_payload, ints_to_payload, payload_to_floats, payload_to_ints, recv_elems, Mailbox,
};
use crate::{coordinated_barrier, Rank, RecvStatus, Source, Transport};

struct Shared {
    mailboxes: Vec<Arc<Mailbox>>,
    epoch: Instant,
}

/// An in-process group of ranks.
pub struct LocalCluster {
    shared: Arc<Shared>,
    size: usize,
}

impl LocalCluster {
    /// Create a cluster of `size` ranks.
    pub fn new(size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::Config("cluster size must be at least 1".to_string()));
        }
        let shared = Arc::new(Shared {
            mailboxes: (0..size).map(|_| Arc::new(Mailbox::new())).collect(),
            epoch: Instant::now(),
        });
        Ok(Self { shared, size })
    }

    /// One transport endpoint per rank, in rank order.
    ///
    /// Each endpoint must be driven by exactly one thread.
    pub fn endpoints(&self) -> Vec<LocalTransport> {
        (0..self.size)
            .map(|rank| LocalTransport {
                rank: rank as Rank,
                shared: self.shared.clone(),
            })
            .collect()
    }

    /// Run `body` once per rank, each on its own named thread, and collect
    /// the per-rank outputs in rank order.
    ///
    /// Fails if a rank thread cannot be spawned. If a rank panics, every
    /// mailbox is closed so the surviving ranks fail their pending receives
    /// instead of blocking forever; the panic is then propagated to the
    /// caller.
    pub fn run<F, T>(size: usize, body: F) -> Result<Vec<T>, Error>
    where
        F: Fn(LocalTransport) -> T + Send + Sync,
        T: Send,
    {
        let cluster = LocalCluster::new(size)?;
        let shared = cluster.shared.clone();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(size);
            for endpoint in cluster.endpoints() {
                let rank = endpoint.rank();
                let body = &body;
                let rank_shared = shared.clone();
                let handle = thread::Builder::new()
                    .name(format!("taskfarm-rank-{rank}"))
                    .spawn_scoped(scope, move || {
                        match catch_unwind(AssertUnwindSafe(|| body(endpoint))) {
                            Ok(output) => output,
                            Err(payload) => {
                                for mailbox in &rank_shared.mailboxes {
                                    mailbox.close();
                                }
                                resume_unwind(payload);
                            }
                        }
                    })
                    .map_err(|e| {
                        // Unblock ranks that already started before bailing out.
                        for mailbox in &shared.mailboxes {
                            mailbox.close();
                        }
                        Error::Config(format!("failed to spawn rank thread: {e}"))
                    })?;
                handles.push(handle);
            }
            Ok(handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|payload| resume_unwind(payload)))
                .collect())
        })
    }
}

/// One rank's endpoint in a [`LocalCluster`].
pub struct LocalTransport {
    rank: Rank,
    shared: Arc<Shared>,
}

impl LocalTransport {
    fn deliver(&self, dest: Rank, tag: Tag, kind: ElemKind, payload: bytes::Bytes) -> Result<(), Error> {
        let mailbox = self
            .shared
            .mailboxes
            .get(dest as usize)
            .ok_or(Error::InvalidRank {
                rank: dest,
                size: self.shared.mailboxes.len(),
            })?;
        mailbox.push(Envelope::new(self.rank, tag, kind, payload));
        Ok(())
    }

    fn mailbox(&self) -> &Mailbox {
        &self.shared.mailboxes[self.rank as usize]
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn send_ints(&self, data: &[i32], dest: Rank, tag: Tag) -> Result<(), Error> {
        self.deliver(dest, tag, ElemKind::Int32, ints_to_payload(data))
    }

    fn recv_ints(&self, buf: &mut [i32], source: Source, tag: Tag) -> Result<RecvStatus, Error> {
        let envelope = recv_elems(self.mailbox(), source, tag, ElemKind::Int32, buf.len())?;
        let len = payload_to_ints(&envelope.payload, buf);
        Ok(RecvStatus {
            source: envelope.source,
            len,
        })
    }

    fn send_bytes(&self, data: &[u8], dest: Rank, tag: Tag) -> Result<(), Error> {
        self.deliver(dest, tag, ElemKind::Byte, bytes::Bytes::copy_from_slice(data))
    }

    fn recv_bytes(&self, buf: &mut [u8], source: Source, tag: Tag) -> Result<RecvStatus, Error> {
        let envelope = recv_elems(self.mailbox(), source, tag, ElemKind::Byte, buf.len())?;
        buf[..envelope.payload.len()].copy_from_slice(&envelope.payload);
        Ok(RecvStatus {
            source: envelope.source,
            len: envelope.payload.len(),
        })
    }

    fn send_floats(&self, data: &[f64], dest: Rank, tag: Tag) -> Result<(), Error> {
        self.deliver(dest, tag, ElemKind::Float64, floats_to_payload(data))
    }

    fn recv_floats(&self, buf: &mut [f64], source: Source, tag: Tag) -> Result<RecvStatus, Error> {
        let envelope = recv_elems(self.mailbox(), source, tag, ElemKind::Float64, buf.len())?;
        let len = payload_to_floats(&envelope.payload, buf);
        Ok(RecvStatus {
            source: envelope.source,
            len,
        })
    }

    fn barrier(&self) -> Result<(), Error> {
        coordinated_barrier(self)
    }

    fn wall_time(&self) -> f64 {
        self.shared.epoch.elapsed().as_secs_f64()
    }
}
