//! The worker loop.
//!
//! A worker runs its init handler once, then cycles: announce itself free,
//! wait for the control word, receive and process one item, return a
//! result/error frame pair. The error frame is always sent; a zero-length
//! error payload means the job succeeded. The loop exits on the shutdown
//! word, after which the cleanup handler runs. Cleanup also runs when the
//! loop fails, so a dying rank still releases whatever init acquired.

use taskfarm_proto::{JobError, Tag, SHUTDOWN};
use taskfarm_transport::{Source, Transport};

use crate::codec::Codec;
use crate::config::FarmConfig;
use crate::error::Error;
use crate::farm::{FarmReport, Role};
use crate::framing::{recv_frame, send_frame};
use crate::handler::Handlers;

pub(crate) fn run<T, C, I, R>(
    transport: &T,
    codec: &C,
    config: &FarmConfig,
    handlers: &mut Handlers<I, R>,
) -> Result<FarmReport, Error>
where
    T: Transport + ?Sized,
    C: Codec<I> + Codec<R>,
{
    let rank = transport.rank();
    tracing::debug!(rank, "worker started");

    handlers.run_init();
    let outcome = work_loop(transport, codec, config, handlers);
    handlers.run_cleanup();

    match outcome {
        Ok(processed) => {
            tracing::debug!(rank, processed, "worker finished");
            Ok(FarmReport {
                role: Role::Worker,
                items_processed: processed,
                ..FarmReport::new(Role::Worker)
            })
        }
        Err(error) => {
            tracing::error!(rank, error = %error, "worker failed");
            Err(error)
        }
    }
}

fn work_loop<T, C, I, R>(
    transport: &T,
    codec: &C,
    config: &FarmConfig,
    handlers: &mut Handlers<I, R>,
) -> Result<u64, Error>
where
    T: Transport + ?Sized,
    C: Codec<I> + Codec<R>,
{
    let rank = transport.rank();
    let controller = config.controller_rank;
    let mut processed = 0u64;

    loop {
        transport.send_ints(&[rank as i32], controller, Tag::REQUEST_WORK)?;

        let mut control = [0i32; 1];
        transport.recv_ints(&mut control, Source::Rank(controller), Tag::DATA_AVAILABLE)?;
        if control[0] == SHUTDOWN {
            tracing::debug!(rank, "shutdown received");
            return Ok(processed);
        }

        let (_, payload) = recv_frame(
            transport,
            Source::Rank(controller),
            Tag::MESSAGE_DATA,
            config.max_frame_size,
        )?;

        let (result_payload, error) = process(codec, handlers, &payload);

        send_frame(
            transport,
            controller,
            Tag::MESSAGE_RESULT,
            &result_payload,
            config.max_frame_size,
        )?;
        let mut error_payload = error.map(|e| e.to_payload()).unwrap_or_default();
        error_payload.truncate(config.max_frame_size);
        send_frame(
            transport,
            controller,
            Tag::MESSAGE_ERROR,
            &error_payload,
            config.max_frame_size,
        )?;

        processed += 1;
    }
}

/// Run one item through the codec and the job handler.
///
/// Item-level failures (decode, job, result encode) never escape: they come
/// back as an empty result plus an error payload for the error channel.
fn process<C, I, R>(
    codec: &C,
    handlers: &mut Handlers<I, R>,
    payload: &[u8],
) -> (Vec<u8>, Option<JobError>)
where
    C: Codec<I> + Codec<R>,
{
    let item: I = match codec.decode(payload) {
        Ok(item) => item,
        Err(error) => {
            return (
                Vec::new(),
                Some(JobError::new(format!("item decode failed: {error}"))),
            )
        }
    };

    match handlers.run_job(item) {
        Ok(result) => match codec.encode(&result) {
            Ok(bytes) => (bytes, None),
            Err(error) => (
                Vec::new(),
                Some(JobError::new(format!("result encode failed: {error}"))),
            ),
        },
        Err(error) => (Vec::new(), Some(error)),
    }
}
