//! The user callback capability set.
//!
//! A farm carries five callbacks, fixed at construction: `init`, `job`, and
//! `cleanup` run on workers; `results` and `errors` run on the controller.
//! Every callback reports failure through [`JobError`]; failures from
//! delivery and lifecycle callbacks are trapped and logged so they never
//! abort the dispatch loop.

use taskfarm_proto::JobError;

/// Worker lifecycle callback, run once before the first item.
pub type InitHandler = Box<dyn FnMut() -> Result<(), JobError>>;

/// The per-item callback run on workers.
pub type JobHandler<I, R> = Box<dyn FnMut(I) -> Result<R, JobError>>;

/// Worker lifecycle callback, run once after shutdown is received.
pub type CleanupHandler = Box<dyn FnMut() -> Result<(), JobError>>;

/// Controller callback invoked with each collected result.
pub type ResultsHandler<R> = Box<dyn FnMut(R) -> Result<(), JobError>>;

/// Controller callback invoked with each reported error.
pub type ErrorHandler = Box<dyn FnMut(JobError) -> Result<(), JobError>>;

/// The capability set, fixed when the farm is built.
pub(crate) struct Handlers<I, R> {
    pub(crate) init: Option<InitHandler>,
    pub(crate) job: JobHandler<I, R>,
    pub(crate) cleanup: Option<CleanupHandler>,
    pub(crate) results: Option<ResultsHandler<R>>,
    pub(crate) errors: Option<ErrorHandler>,
}

impl<I, R> Handlers<I, R> {
    pub(crate) fn run_init(&mut self) {
        if let Some(handler) = &mut self.init {
            if let Err(error) = handler() {
                tracing::warn!(error = %error, "init handler failed");
            }
        }
    }

    pub(crate) fn run_job(&mut self, item: I) -> Result<R, JobError> {
        (self.job)(item)
    }

    pub(crate) fn run_cleanup(&mut self) {
        if let Some(handler) = &mut self.cleanup {
            if let Err(error) = handler() {
                tracing::warn!(error = %error, "cleanup handler failed");
            }
        }
    }

    pub(crate) fn deliver_result(&mut self, result: R) {
        if let Some(handler) = &mut self.results {
            if let Err(error) = handler(result) {
                tracing::warn!(error = %error, "results handler failed");
            }
        }
    }

    pub(crate) fn deliver_error(&mut self, error: JobError) {
        if let Some(handler) = &mut self.errors {
            if let Err(handler_error) = handler(error) {
                tracing::warn!(error = %handler_error, "error handler failed");
            }
        }
    }
}
