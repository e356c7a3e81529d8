//! The user-facing farm: builder, role election, and lifecycle.
//!
//! Every rank of the process group constructs the same [`Farm`] and calls
//! [`Farm::run`]. The rank matching the configured controller rank drives
//! the data source; all other ranks run the worker loop. With a single rank
//! there are no workers and the controller runs the job handler inline.

use std::collections::HashMap;

use taskfarm_proto::JobError;
use taskfarm_transport::{Rank, Transport};

use crate::codec::Codec;
use crate::config::FarmConfig;
use crate::controller::Controller;
use crate::error::Error;
use crate::handler::{
    CleanupHandler, ErrorHandler, Handlers, InitHandler, JobHandler, ResultsHandler,
};
use crate::source::DataSource;
use crate::worker;

/// The role a rank plays in the farm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the data source and dispatches items.
    Controller,
    /// Requests and processes items.
    Worker,
}

impl Role {
    /// The role of `rank` given the configured controller rank.
    pub fn of(rank: Rank, controller_rank: Rank) -> Self {
        if rank == controller_rank {
            Role::Controller
        } else {
            Role::Worker
        }
    }
}

/// Summary of one rank's run, returned by [`Farm::run`].
///
/// Controller fields are zero on worker ranks and vice versa.
#[derive(Debug, Clone)]
pub struct FarmReport {
    /// The role this rank played.
    pub role: Role,
    /// Items shipped to workers (or run inline on a single rank).
    pub items_dispatched: u64,
    /// Items dropped because they failed to encode.
    pub items_dropped: u64,
    /// Results delivered to the results handler.
    pub results_collected: u64,
    /// Errors delivered to the error handler.
    pub errors_reported: u64,
    /// Shutdown signals sent during the drain phase.
    pub workers_shut_down: u64,
    /// Items this rank processed as a worker.
    pub items_processed: u64,
    /// Whether the wall-clock limit cut dispatching short.
    pub deadline_expired: bool,
    /// Collected result/error rounds per worker rank.
    pub collected_per_worker: HashMap<Rank, u64>,
}

impl FarmReport {
    /// An empty report for the given role.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            items_dispatched: 0,
            items_dropped: 0,
            results_collected: 0,
            errors_reported: 0,
            workers_shut_down: 0,
            items_processed: 0,
            deadline_expired: false,
            collected_per_worker: HashMap::new(),
        }
    }
}

/// A configured job farm, ready to run on every rank of a process group.
pub struct Farm<I, R, C> {
    codec: C,
    config: FarmConfig,
    source: DataSource<I>,
    handlers: Handlers<I, R>,
}

impl<I, R, C> Farm<I, R, C>
where
    C: Codec<I> + Codec<R>,
{
    /// Start building a farm around the given codec.
    pub fn builder(codec: C) -> FarmBuilder<I, R, C> {
        FarmBuilder::new(codec)
    }

    /// Run this rank's role to completion. Blocks until the whole group has
    /// terminated.
    pub fn run<T>(mut self, transport: &T) -> Result<FarmReport, Error>
    where
        T: Transport + ?Sized,
    {
        let rank = transport.rank();
        let size = transport.size();
        if self.config.controller_rank as usize >= size {
            return Err(Error::Config(format!(
                "controller rank {} outside a group of {size}",
                self.config.controller_rank
            )));
        }
        tracing::info!(rank, size, "farm starting");

        let outcome = if size == 1 {
            self.run_solo(transport)
        } else {
            match Role::of(rank, self.config.controller_rank) {
                Role::Controller => Controller::new(transport, &self.codec, &self.config)
                    .run(&mut self.source, &mut self.handlers),
                Role::Worker => {
                    worker::run(transport, &self.codec, &self.config, &mut self.handlers)
                }
            }
        };

        // Keep the group together through teardown; a rank must not release
        // the transport while its peers still drain. A dead transport fails
        // the barrier, and that error is subsumed by the primary outcome.
        if let Err(error) = transport.barrier() {
            tracing::debug!(rank, error = %error, "final barrier failed");
        }
        outcome
    }

    /// Inline execution for a group of one: no workers exist, so the
    /// controller runs the whole worker lifecycle itself, preserving the
    /// delivery semantics of the distributed path.
    fn run_solo<T>(&mut self, transport: &T) -> Result<FarmReport, Error>
    where
        T: Transport + ?Sized,
    {
        tracing::info!("single rank, running jobs inline on the controller");
        let mut report = FarmReport::new(Role::Controller);

        self.handlers.run_init();
        let deadline = self
            .config
            .time_limit
            .map(|limit| transport.wall_time() + limit.as_secs_f64());

        loop {
            if let Some(deadline) = deadline {
                if transport.wall_time() >= deadline {
                    report.deadline_expired = true;
                    tracing::info!(
                        dispatched = report.items_dispatched,
                        "time limit reached, stopping"
                    );
                    break;
                }
            }
            let Some(item) = self.source.next() else { break };

            report.items_dispatched += 1;
            report.items_processed += 1;
            match self.handlers.run_job(item) {
                Ok(result) => {
                    self.handlers.deliver_result(result);
                    report.results_collected += 1;
                }
                Err(error) => {
                    self.handlers.deliver_error(error);
                    report.errors_reported += 1;
                }
            }
        }
        self.handlers.run_cleanup();

        if report.deadline_expired && report.items_dispatched == 0 {
            return Err(Error::DeadlineExceeded);
        }
        Ok(report)
    }
}

/// Builder for [`Farm`]. The handler set is fixed once `build` is called.
pub struct FarmBuilder<I, R, C> {
    codec: C,
    config: FarmConfig,
    source: Option<DataSource<I>>,
    init: Option<InitHandler>,
    job: Option<JobHandler<I, R>>,
    cleanup: Option<CleanupHandler>,
    results: Option<ResultsHandler<R>>,
    errors: Option<ErrorHandler>,
}

impl<I, R, C> FarmBuilder<I, R, C> {
    /// Start a builder around the given codec.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            config: FarmConfig::new(),
            source: None,
            init: None,
            job: None,
            cleanup: None,
            results: None,
            errors: None,
        }
    }

    /// Replace the default configuration.
    pub fn with_config(mut self, config: FarmConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the data source. Only the controller rank draws from it.
    pub fn with_source(mut self, source: DataSource<I>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the data source from an in-memory collection.
    pub fn with_items<It>(self, items: It) -> Self
    where
        It: IntoIterator<Item = I>,
        It::IntoIter: 'static,
    {
        self.with_source(DataSource::from_items(items))
    }

    /// Set the init handler, run once on each worker before its first item.
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: FnMut() -> Result<(), JobError> + 'static,
    {
        self.init = Some(Box::new(init));
        self
    }

    /// Set the job handler, run on a worker for every item. Required.
    pub fn with_job<F>(mut self, job: F) -> Self
    where
        F: FnMut(I) -> Result<R, JobError> + 'static,
    {
        self.job = Some(Box::new(job));
        self
    }

    /// Set the cleanup handler, run once on each worker after shutdown.
    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: FnMut() -> Result<(), JobError> + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Set the results handler, invoked on the controller with each
    /// collected result.
    ///
    /// Results arrive in dispatch order - the order worker requests reached
    /// the controller - not in data-source order. Callers that need input
    /// order must stamp items and reorder downstream.
    pub fn on_result<F>(mut self, results: F) -> Self
    where
        F: FnMut(R) -> Result<(), JobError> + 'static,
    {
        self.results = Some(Box::new(results));
        self
    }

    /// Set the error handler, invoked on the controller with each reported
    /// error. Delivery order matches [`FarmBuilder::on_result`].
    pub fn on_error<F>(mut self, errors: F) -> Self
    where
        F: FnMut(JobError) -> Result<(), JobError> + 'static,
    {
        self.errors = Some(Box::new(errors));
        self
    }

    /// Finish the builder. Fails if no job handler was set.
    pub fn build(self) -> Result<Farm<I, R, C>, Error> {
        let job = self
            .job
            .ok_or_else(|| Error::Config("a job handler is required".to_string()))?;

        Ok(Farm {
            codec: self.codec,
            config: self.config,
            source: self.source.unwrap_or_else(DataSource::empty),
            handlers: Handlers {
                init: self.init,
                job,
                cleanup: self.cleanup,
                results: self.results,
                errors: self.errors,
            },
        })
    }
}
