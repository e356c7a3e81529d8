//! Taskfarm core - the controller/worker job-farming coordinator.
//!
//! A single controller rank draws items from a [`DataSource`] and hands each
//! one to exactly one worker, on demand: a worker announces itself free, the
//! controller collects that worker's previous result if it holds one, then
//! ships the next item. When the source runs dry (or the wall-clock limit
//! expires) the controller drains outstanding results and shuts every worker
//! down exactly once.
//!
//! The coordinator is written against the blocking
//! [`Transport`](taskfarm_transport::Transport) abstraction and is
//! polymorphic over a [`Codec`], so user payloads stay opaque end to end.
//!
//! Results are delivered to the controller-side handlers in dispatch order
//! (the order worker requests arrive), not in data-source order.
//!
//! ```no_run
//! use taskfarm_core::{Farm, JsonCodec};
//! use taskfarm_transport::{ClusterConfig, NngTransport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = NngTransport::connect(ClusterConfig::new(
//!     0,
//!     ["tcp://node0:7700", "tcp://node1:7700"],
//! ))?;
//!
//! let report = Farm::builder(JsonCodec)
//!     .with_items(vec![1u64, 2, 3])
//!     .with_job(|item: u64| Ok(item + 1))
//!     .on_result(|result: u64| {
//!         println!("{result}");
//!         Ok(())
//!     })
//!     .build()?
//!     .run(&transport)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod farm;
pub mod framing;
pub mod handler;
pub mod source;
pub mod state;

mod controller;
mod worker;

pub use codec::{BytesCodec, Codec, CodecError, JsonCodec};
pub use config::{FarmConfig, DEFAULT_CONTROLLER_RANK, DEFAULT_MAX_FRAME_SIZE};
pub use error::Error;
pub use farm::{Farm, FarmBuilder, FarmReport, Role};
pub use source::DataSource;
pub use state::{NodeCursor, WorkerPool};

/// Re-export protocol types.
pub use taskfarm_proto as proto;
pub use taskfarm_proto::{JobError, Tag};
