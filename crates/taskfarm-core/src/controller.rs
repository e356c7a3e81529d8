//! The dispatch loop and the termination drain.
//!
//! One dispatch round: encode the next item, wait for a work request from
//! any rank, collect the requester's previous result if it holds one, then
//! activate it and ship the item. A worker never holds more than one
//! outstanding item. Results reach the user handlers in request-arrival
//! order, not data-source order.

use std::collections::HashMap;

use taskfarm_proto::{JobError, Tag, SHUTDOWN, WORK_FOLLOWS};
use taskfarm_transport::{Rank, Source, Transport};

use crate::codec::{Codec, CodecError};
use crate::config::FarmConfig;
use crate::error::Error;
use crate::farm::{FarmReport, Role};
use crate::framing::{recv_frame, send_frame};
use crate::handler::Handlers;
use crate::source::DataSource;
use crate::state::{NodeCursor, WorkerPool};

pub(crate) struct Controller<'a, T: Transport + ?Sized, C> {
    transport: &'a T,
    codec: &'a C,
    config: &'a FarmConfig,
    pool: WorkerPool,
    cursor: NodeCursor,
    drained: bool,
    deadline_expired: bool,
    dispatched: u64,
    dropped: u64,
    results: u64,
    errors: u64,
    shutdowns: u64,
    collected_per_worker: HashMap<Rank, u64>,
}

impl<'a, T: Transport + ?Sized, C> Controller<'a, T, C> {
    pub(crate) fn new(transport: &'a T, codec: &'a C, config: &'a FarmConfig) -> Self {
        Self {
            transport,
            codec,
            config,
            pool: WorkerPool::new(),
            cursor: NodeCursor::new(),
            drained: false,
            deadline_expired: false,
            dispatched: 0,
            dropped: 0,
            results: 0,
            errors: 0,
            shutdowns: 0,
            collected_per_worker: HashMap::new(),
        }
    }

    pub(crate) fn run<I, R>(
        mut self,
        source: &mut DataSource<I>,
        handlers: &mut Handlers<I, R>,
    ) -> Result<FarmReport, Error>
    where
        C: Codec<I> + Codec<R>,
    {
        let workers = self.transport.size() - 1;
        tracing::info!(workers, "controller started");

        let deadline = self
            .config
            .time_limit
            .map(|limit| self.transport.wall_time() + limit.as_secs_f64());

        if let Err(error) = self.dispatch_all(source, handlers, deadline) {
            tracing::error!(error = %error, "dispatch failed, signaling workers");
            self.abort_workers();
            return Err(error);
        }
        if let Err(error) = self.drain(handlers) {
            tracing::error!(error = %error, "drain failed, signaling workers");
            self.abort_workers();
            return Err(error);
        }

        tracing::info!(
            dispatched = self.dispatched,
            results = self.results,
            errors = self.errors,
            "controller finished"
        );

        if self.deadline_expired && self.dispatched == 0 {
            return Err(Error::DeadlineExceeded);
        }
        Ok(self.report())
    }

    fn dispatch_all<I, R>(
        &mut self,
        source: &mut DataSource<I>,
        handlers: &mut Handlers<I, R>,
        deadline: Option<f64>,
    ) -> Result<(), Error>
    where
        C: Codec<I> + Codec<R>,
    {
        loop {
            if let Some(deadline) = deadline {
                if self.transport.wall_time() >= deadline {
                    self.deadline_expired = true;
                    tracing::info!(dispatched = self.dispatched, "time limit reached, draining");
                    return Ok(());
                }
            }
            let Some(item) = source.next() else {
                return Ok(());
            };

            // Encode before touching the protocol: a failed encode drops the
            // item without consuming a work request.
            let payload = match self.codec.encode(&item) {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::warn!(error = %error, "dropping item that failed to encode");
                    self.dropped += 1;
                    continue;
                }
            };

            let worker = self.await_request()?;
            if self.pool.is_active(worker) {
                self.collect(worker, handlers)?;
            }

            self.pool.activate(worker);
            self.transport
                .send_ints(&[WORK_FOLLOWS], worker, Tag::DATA_AVAILABLE)?;
            send_frame(
                self.transport,
                worker,
                Tag::MESSAGE_DATA,
                &payload,
                self.config.max_frame_size,
            )?;
            self.dispatched += 1;
            tracing::debug!(worker, dispatched = self.dispatched, "item dispatched");
        }
    }

    /// Wait for the next work request and return the requesting rank.
    ///
    /// Requests from ranks outside the worker set are logged and suppressed.
    fn await_request(&mut self) -> Result<Rank, Error> {
        loop {
            let mut claimed = [0i32; 1];
            let status =
                self.transport
                    .recv_ints(&mut claimed, Source::Any, Tag::REQUEST_WORK)?;
            let worker = status.source;

            if worker == self.config.controller_rank || (worker as usize) >= self.transport.size()
            {
                tracing::warn!(worker, "ignoring work request from unexpected rank");
                continue;
            }
            if status.len == 1 && claimed[0] != worker as i32 {
                tracing::warn!(
                    worker,
                    claimed = claimed[0],
                    "work request payload does not match its sender"
                );
            }
            return Ok(worker);
        }
    }

    /// Collect the outstanding result/error pair from `worker` and deliver
    /// it to the user handlers.
    fn collect<I, R>(&mut self, worker: Rank, handlers: &mut Handlers<I, R>) -> Result<(), Error>
    where
        C: Codec<I> + Codec<R>,
    {
        let (_, result_payload) = recv_frame(
            self.transport,
            Source::Rank(worker),
            Tag::MESSAGE_RESULT,
            self.config.max_frame_size,
        )?;
        let (_, error_payload) = recv_frame(
            self.transport,
            Source::Rank(worker),
            Tag::MESSAGE_ERROR,
            self.config.max_frame_size,
        )?;

        *self.collected_per_worker.entry(worker).or_insert(0) += 1;

        if error_payload.is_empty() {
            let decoded: Result<R, CodecError> = self.codec.decode(&result_payload);
            match decoded {
                Ok(result) => {
                    handlers.deliver_result(result);
                    self.results += 1;
                }
                Err(error) => {
                    tracing::warn!(worker, error = %error, "failed to decode result");
                    handlers.deliver_error(JobError::new(format!("result decode failed: {error}")));
                    self.errors += 1;
                }
            }
        } else {
            handlers.deliver_error(JobError::from_payload(&error_payload));
            self.errors += 1;
        }
        Ok(())
    }

    /// Collect remaining results and shut every worker down exactly once.
    ///
    /// A second invocation is a no-op.
    fn drain<I, R>(&mut self, handlers: &mut Handlers<I, R>) -> Result<(), Error>
    where
        C: Codec<I> + Codec<R>,
    {
        if self.drained {
            return Ok(());
        }

        let size = self.transport.size();
        while let Some(worker) = self.cursor.next_node(size, self.config.controller_rank) {
            let mut claimed = [0i32; 1];
            self.transport
                .recv_ints(&mut claimed, Source::Rank(worker), Tag::REQUEST_WORK)?;
            if self.pool.is_active(worker) {
                self.collect(worker, handlers)?;
            }
            self.pool.deactivate(worker);
            self.transport
                .send_ints(&[SHUTDOWN], worker, Tag::DATA_AVAILABLE)?;
            self.shutdowns += 1;
            tracing::debug!(worker, "worker shut down");
        }
        self.drained = true;
        Ok(())
    }

    /// Best-effort shutdown broadcast after a fatal error, so workers that
    /// are still reachable do not wait for items that will never come.
    fn abort_workers(&mut self) {
        for worker in 0..self.transport.size() as Rank {
            if worker == self.config.controller_rank {
                continue;
            }
            if let Err(error) = self
                .transport
                .send_ints(&[SHUTDOWN], worker, Tag::DATA_AVAILABLE)
            {
                tracing::warn!(worker, error = %error, "failed to signal worker during abort");
            }
        }
    }

    fn report(&self) -> FarmReport {
        FarmReport {
            role: Role::Controller,
            items_dispatched: self.dispatched,
            items_dropped: self.dropped,
            results_collected: self.results,
            errors_reported: self.errors,
            workers_shut_down: self.shutdowns,
            items_processed: 0,
            deadline_expired: self.deadline_expired,
            collected_per_worker: self.collected_per_worker.clone(),
        }
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.pool.active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use std::cell::RefCell;
    use std::rc::Rc;
    use taskfarm_proto::MAX_MESSAGE_SIZE;
    use taskfarm_transport::LocalCluster;

    /// A minimal worker speaking the raw protocol: echoes each item payload
    /// back as its result with an empty error.
    fn echo_worker<T: Transport>(transport: &T, controller: Rank) {
        loop {
            transport
                .send_ints(&[transport.rank() as i32], controller, Tag::REQUEST_WORK)
                .unwrap();
            let mut buf = [0i32; 1];
            transport
                .recv_ints(&mut buf, Source::Rank(controller), Tag::DATA_AVAILABLE)
                .unwrap();
            if buf[0] == SHUTDOWN {
                return;
            }
            let (_, payload) = recv_frame(
                transport,
                Source::Rank(controller),
                Tag::MESSAGE_DATA,
                MAX_MESSAGE_SIZE,
            )
            .unwrap();
            send_frame(
                transport,
                controller,
                Tag::MESSAGE_RESULT,
                &payload,
                MAX_MESSAGE_SIZE,
            )
            .unwrap();
            send_frame(transport, controller, Tag::MESSAGE_ERROR, &[], MAX_MESSAGE_SIZE).unwrap();
        }
    }

    fn sink_handlers(seen: Rc<RefCell<Vec<u32>>>) -> Handlers<u32, u32> {
        Handlers {
            init: None,
            job: Box::new(|item| Ok(item)),
            cleanup: None,
            results: Some(Box::new(move |result| {
                seen.borrow_mut().push(result);
                Ok(())
            })),
            errors: None,
        }
    }

    #[test]
    fn test_dispatch_and_drain_bookkeeping() {
        LocalCluster::run(2, |transport| {
            if transport.rank() == 0 {
                let codec = JsonCodec;
                let config = FarmConfig::new();
                let seen = Rc::new(RefCell::new(Vec::new()));
                let mut handlers = sink_handlers(seen.clone());
                let mut source = DataSource::from_items(vec![5u32, 6, 7]);

                let mut controller = Controller::new(&transport, &codec, &config);
                controller
                    .dispatch_all(&mut source, &mut handlers, None)
                    .unwrap();
                controller.drain(&mut handlers).unwrap();

                assert_eq!(controller.dispatched, 3);
                assert_eq!(controller.results + controller.errors, 3);
                assert_eq!(controller.shutdowns, 1);
                assert_eq!(controller.active_count(), 0);
                assert_eq!(*seen.borrow(), vec![5, 6, 7]);
            } else {
                echo_worker(&transport, 0);
            }
        })
        .unwrap();
    }

    #[test]
    fn test_drain_is_idempotent() {
        LocalCluster::run(2, |transport| {
            if transport.rank() == 0 {
                let codec = JsonCodec;
                let config = FarmConfig::new();
                let seen = Rc::new(RefCell::new(Vec::new()));
                let mut handlers = sink_handlers(seen);
                let mut source = DataSource::from_items(vec![1u32]);

                let mut controller = Controller::new(&transport, &codec, &config);
                controller
                    .dispatch_all(&mut source, &mut handlers, None)
                    .unwrap();
                controller.drain(&mut handlers).unwrap();
                let shutdowns = controller.shutdowns;

                // The teardown sweep must not run twice.
                controller.drain(&mut handlers).unwrap();
                assert_eq!(controller.shutdowns, shutdowns);
                assert_eq!(controller.active_count(), 0);
            } else {
                echo_worker(&transport, 0);
            }
        })
        .unwrap();
    }

    #[test]
    fn test_empty_source_still_shuts_workers_down() {
        LocalCluster::run(3, |transport| {
            if transport.rank() == 0 {
                let codec = JsonCodec;
                let config = FarmConfig::new();
                let seen = Rc::new(RefCell::new(Vec::new()));
                let mut handlers = sink_handlers(seen.clone());
                let mut source: DataSource<u32> = DataSource::empty();

                let mut controller = Controller::new(&transport, &codec, &config);
                controller
                    .dispatch_all(&mut source, &mut handlers, None)
                    .unwrap();
                controller.drain(&mut handlers).unwrap();

                assert_eq!(controller.dispatched, 0);
                assert_eq!(controller.shutdowns, 2);
                assert!(seen.borrow().is_empty());
            } else {
                echo_worker(&transport, 0);
            }
        })
        .unwrap();
    }
}
