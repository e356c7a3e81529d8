//! Socket mesh transport over nng.
//!
//! Every rank listens on one pull socket and dials a push socket to each
//! peer. A receiver thread drains the pull socket and routes decoded
//! envelopes into the rank's mailbox, where the blocking typed receives do
//! their tag/source matching. The barrier is coordinated through rank 0 with
//! point-to-point messages on the reserved barrier tag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nng::options::Options;
use nng::{Message, Protocol, Socket};

use taskfarm_proto::envelope::HEADER_SIZE;
use taskfarm_proto::{decode_envelope, encode_envelope, ElemKind, Envelope, Tag};

use crate::error::Error;
use crate::mailbox::{
    floats_to_payload, ints_to_payload, payload_to_floats, payload_to_ints, recv_elems, Mailbox,
};
use crate::{Rank, RecvStatus, Source, Transport};

/// Default maximum payload size accepted from peers.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = taskfarm_proto::MAX_MESSAGE_SIZE;

/// Default number of dial attempts per peer during startup.
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 50;

/// Default pause between dial attempts.
pub const DEFAULT_DIAL_RETRY: Duration = Duration::from_millis(100);

/// How often the receiver thread wakes to check the stop flag.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Configuration for a socket-mesh process group.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// This process's rank.
    pub rank: Rank,
    /// Listen address of every rank, indexed by rank.
    pub peers: Vec<String>,
    /// Maximum payload size accepted from peers.
    pub max_message_size: usize,
    /// Number of dial attempts per peer during startup.
    pub dial_attempts: u32,
    /// Pause between dial attempts.
    pub dial_retry: Duration,
}

impl ClusterConfig {
    /// Create a configuration for `rank` in a group described by `peers`.
    pub fn new<I, S>(rank: Rank, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rank,
            peers: peers.into_iter().map(Into::into).collect(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
            dial_retry: DEFAULT_DIAL_RETRY,
        }
    }

    /// Set the maximum payload size accepted from peers.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the startup dial retry policy.
    pub fn with_dial_retry(mut self, attempts: u32, retry: Duration) -> Self {
        self.dial_attempts = attempts.max(1);
        self.dial_retry = retry;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.peers.is_empty() {
            return Err(Error::Config("peer list must not be empty".to_string()));
        }
        if self.rank as usize >= self.peers.len() {
            return Err(Error::InvalidRank {
                rank: self.rank,
                size: self.peers.len(),
            });
        }
        Ok(())
    }
}

fn socket_err(context: &str, error: nng::Error) -> Error {
    Error::Socket(format!("{context}: {error}"))
}

/// A process group connected through an nng push/pull mesh.
///
/// Construction initializes the group member: it binds the listen address,
/// dials every peer, and starts the receiver thread. Dropping the transport
/// finalizes it on every exit path, including panics.
pub struct NngTransport {
    rank: Rank,
    size: usize,
    mailbox: Arc<Mailbox>,
    outbound: Vec<Option<Socket>>,
    stop: Arc<AtomicBool>,
    receiver: Option<thread::JoinHandle<()>>,
    epoch: Instant,
}

impl NngTransport {
    /// Join the process group described by `config`.
    ///
    /// Blocks until every peer's listen address is dialable or the retry
    /// budget is exhausted.
    pub fn connect(config: ClusterConfig) -> Result<Self, Error> {
        config.validate()?;
        let rank = config.rank;
        let size = config.peers.len();

        let pull = Socket::new(Protocol::Pull0)
            .map_err(|e| socket_err("failed to create pull socket", e))?;
        pull.set_opt::<nng::options::RecvMaxSize>(config.max_message_size + HEADER_SIZE)
            .map_err(|e| socket_err("failed to set max message size", e))?;
        pull.set_opt::<nng::options::RecvTimeout>(Some(RECV_POLL_INTERVAL))
            .map_err(|e| socket_err("failed to set receive timeout", e))?;
        pull.listen(&config.peers[rank as usize]).map_err(|e| {
            socket_err(&format!("failed to listen on {}", config.peers[rank as usize]), e)
        })?;
        tracing::info!(rank, address = %config.peers[rank as usize], "listening");

        let mut outbound = Vec::with_capacity(size);
        for (peer, address) in config.peers.iter().enumerate() {
            if peer as Rank == rank {
                outbound.push(None);
                continue;
            }
            let socket = Socket::new(Protocol::Push0)
                .map_err(|e| socket_err("failed to create push socket", e))?;
            dial_with_retry(&socket, address, config.dial_attempts, config.dial_retry)?;
            tracing::debug!(rank, peer, address = %address, "connected");
            outbound.push(Some(socket));
        }

        let mailbox = Arc::new(Mailbox::new());
        let stop = Arc::new(AtomicBool::new(false));
        let receiver = spawn_receiver(rank, pull, mailbox.clone(), stop.clone())?;

        Ok(Self {
            rank,
            size,
            mailbox,
            outbound,
            stop,
            receiver: Some(receiver),
            epoch: Instant::now(),
        })
    }

    fn transmit(&self, data_kind: ElemKind, payload: bytes::Bytes, dest: Rank, tag: Tag) -> Result<(), Error> {
        if dest as usize >= self.size {
            return Err(Error::InvalidRank {
                rank: dest,
                size: self.size,
            });
        }
        let envelope = Envelope::new(self.rank, tag, data_kind, payload);
        if dest == self.rank {
            self.mailbox.push(envelope);
            return Ok(());
        }

        let wire = encode_envelope(&envelope)?;
        let Some(socket) = self.outbound[dest as usize].as_ref() else {
            return Err(Error::InvalidRank {
                rank: dest,
                size: self.size,
            });
        };
        socket
            .send(Message::from(wire.as_slice()))
            .map_err(|(_, e)| socket_err(&format!("failed to send to rank {dest}"), e))
    }
}

fn dial_with_retry(
    socket: &Socket,
    address: &str,
    attempts: u32,
    retry: Duration,
) -> Result<(), Error> {
    let mut remaining = attempts.max(1);
    loop {
        match socket.dial(address) {
            Ok(()) => return Ok(()),
            Err(error) => {
                remaining -= 1;
                if remaining == 0 {
                    return Err(socket_err(
                        &format!("failed to dial {address} after {attempts} attempts"),
                        error,
                    ));
                }
                thread::sleep(retry);
            }
        }
    }
}

fn spawn_receiver(
    rank: Rank,
    pull: Socket,
    mailbox: Arc<Mailbox>,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, Error> {
    thread::Builder::new()
        .name(format!("taskfarm-net-{rank}"))
        .spawn(move || {
            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                match pull.recv() {
                    Ok(message) => match decode_envelope(message.as_slice()) {
                        Ok(envelope) => mailbox.push(envelope),
                        Err(error) => {
                            tracing::warn!(rank, error = %error, "dropping malformed envelope");
                        }
                    },
                    Err(nng::Error::TimedOut) => continue,
                    Err(nng::Error::Closed) => break,
                    Err(error) => {
                        tracing::error!(rank, error = %error, "receive failed, stopping");
                        break;
                    }
                }
            }
            mailbox.close();
            tracing::debug!(rank, "receiver stopped");
        })
        .map_err(|e| Error::Config(format!("failed to spawn receiver thread: {e}")))
}

impl Transport for NngTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_ints(&self, data: &[i32], dest: Rank, tag: Tag) -> Result<(), Error> {
        self.transmit(ElemKind::Int32, ints_to_payload(data), dest, tag)
    }

    fn recv_ints(&self, buf: &mut [i32], source: Source, tag: Tag) -> Result<RecvStatus, Error> {
        let envelope = recv_elems(&self.mailbox, source, tag, ElemKind::Int32, buf.len())?;
        let len = payload_to_ints(&envelope.payload, buf);
        Ok(RecvStatus {
            source: envelope.source,
            len,
        })
    }

    fn send_bytes(&self, data: &[u8], dest: Rank, tag: Tag) -> Result<(), Error> {
        self.transmit(ElemKind::Byte, bytes::Bytes::copy_from_slice(data), dest, tag)
    }

    fn recv_bytes(&self, buf: &mut [u8], source: Source, tag: Tag) -> Result<RecvStatus, Error> {
        let envelope = recv_elems(&self.mailbox, source, tag, ElemKind::Byte, buf.len())?;
        buf[..envelope.payload.len()].copy_from_slice(&envelope.payload);
        Ok(RecvStatus {
            source: envelope.source,
            len: envelope.payload.len(),
        })
    }

    fn send_floats(&self, data: &[f64], dest: Rank, tag: Tag) -> Result<(), Error> {
        self.transmit(ElemKind::Float64, floats_to_payload(data), dest, tag)
    }

    fn recv_floats(&self, buf: &mut [f64], source: Source, tag: Tag) -> Result<RecvStatus, Error> {
        let envelope = recv_elems(&self.mailbox, source, tag, ElemKind::Float64, buf.len())?;
        let len = payload_to_floats(&envelope.payload, buf);
        Ok(RecvStatus {
            source: envelope.source,
            len,
        })
    }

    fn barrier(&self) -> Result<(), Error> {
        crate::coordinated_barrier(self)
    }

    fn wall_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Drop for NngTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // The receiver polls the stop flag on its receive timeout, so the
        // join completes within one poll interval.
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
        self.mailbox.close();
        tracing::debug!(rank = self.rank, "transport finalized");
    }
}
