//! Blocking message-passing transports for the taskfarm runtime.
//!
//! The coordinator is written against the [`Transport`] trait: a blocking
//! SPMD process group with typed point-to-point send/receive, wildcard-source
//! receive, a barrier, and a wall clock. Two implementations ship here:
//!
//! - [`LocalCluster`] / [`LocalTransport`] - one thread per rank inside a
//!   single process, backed by in-memory mailboxes. This is the test harness
//!   and the single-machine execution mode.
//! - [`NngTransport`] - a socket mesh across processes, one pull listener per
//!   rank and push dialers to every peer.
//!
//! Transport construction performs initialization; dropping the transport
//! releases it, on every exit path including panics.

pub mod error;
pub mod local;
pub mod mailbox;
pub mod remote;

pub use error::Error;
pub use local::{LocalCluster, LocalTransport};
pub use mailbox::Mailbox;
pub use remote::{ClusterConfig, NngTransport};

use taskfarm_proto::Tag;

/// Index of a process in the group.
pub type Rank = u32;

/// Source filter for a receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Match a message from any sender.
    Any,
    /// Match only messages from this rank.
    Rank(Rank),
}

impl Source {
    /// Whether a message from `sender` satisfies this filter.
    pub fn matches(self, sender: Rank) -> bool {
        match self {
            Source::Any => true,
            Source::Rank(rank) => rank == sender,
        }
    }
}

/// Outcome of a completed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvStatus {
    /// Rank the message actually came from.
    pub source: Rank,
    /// Number of elements received. May be less than the buffer capacity.
    pub len: usize,
}

/// A blocking SPMD message-passing substrate.
///
/// All calls may block until the operation is locally completable; there are
/// no timed waits or polling loops. Between any two ranks, messages on one
/// tag are delivered in send order.
pub trait Transport {
    /// This process's rank in the group.
    fn rank(&self) -> Rank;

    /// Number of processes in the group, at least 1.
    fn size(&self) -> usize;

    /// Send `i32` elements to `dest` under `tag`.
    fn send_ints(&self, data: &[i32], dest: Rank, tag: Tag) -> Result<(), Error>;

    /// Receive `i32` elements into `buf` from `source` under `tag`.
    fn recv_ints(&self, buf: &mut [i32], source: Source, tag: Tag) -> Result<RecvStatus, Error>;

    /// Send byte elements to `dest` under `tag`.
    fn send_bytes(&self, data: &[u8], dest: Rank, tag: Tag) -> Result<(), Error>;

    /// Receive byte elements into `buf` from `source` under `tag`.
    fn recv_bytes(&self, buf: &mut [u8], source: Source, tag: Tag) -> Result<RecvStatus, Error>;

    /// Send `f64` elements to `dest` under `tag`.
    fn send_floats(&self, data: &[f64], dest: Rank, tag: Tag) -> Result<(), Error>;

    /// Receive `f64` elements into `buf` from `source` under `tag`.
    fn recv_floats(&self, buf: &mut [f64], source: Source, tag: Tag) -> Result<RecvStatus, Error>;

    /// Block until every rank in the group has entered the barrier.
    fn barrier(&self) -> Result<(), Error>;

    /// Seconds of wall-clock time since transport initialization.
    fn wall_time(&self) -> f64;
}

/// Barrier coordinated through rank 0 with point-to-point messages on the
/// reserved barrier tag.
///
/// Message-based rather than a shared in-memory barrier so that a dying
/// transport fails the barrier instead of leaving peers blocked forever.
/// Rank 0 gathers one arrival per rank - receiving from each specific rank
/// keeps a fast peer's next-barrier arrival from being counted toward this
/// one - then releases everyone.
pub(crate) fn coordinated_barrier<T>(transport: &T) -> Result<(), Error>
where
    T: Transport + ?Sized,
{
    const ROOT: Rank = 0;
    let size = transport.size();
    if size == 1 {
        return Ok(());
    }

    let mut buf = [0i32; 1];
    if transport.rank() == ROOT {
        for peer in 1..size as Rank {
            transport.recv_ints(&mut buf, Source::Rank(peer), Tag::BARRIER)?;
        }
        for peer in 1..size as Rank {
            transport.send_ints(&[0], peer, Tag::BARRIER)?;
        }
    } else {
        transport.send_ints(&[transport.rank() as i32], ROOT, Tag::BARRIER)?;
        transport.recv_ints(&mut buf, Source::Rank(ROOT), Tag::BARRIER)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_matching() {
        assert!(Source::Any.matches(0));
        assert!(Source::Any.matches(7));
        assert!(Source::Rank(3).matches(3));
        assert!(!Source::Rank(3).matches(4));
    }
}
