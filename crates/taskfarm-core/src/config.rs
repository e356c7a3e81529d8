//! Farm configuration.

use std::time::Duration;

use taskfarm_transport::Rank;

/// Default rank that owns the data source and dispatches items.
pub const DEFAULT_CONTROLLER_RANK: Rank = 0;

/// Default maximum framed payload size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = taskfarm_proto::MAX_MESSAGE_SIZE;

/// Runtime configuration for a farm.
#[derive(Debug, Clone)]
pub struct FarmConfig {
    /// Rank that runs the controller. All other ranks run workers.
    pub controller_rank: Rank,

    /// Wall-clock budget for dispatching. Checked between dispatch rounds;
    /// once expired the controller skips to the drain phase.
    pub time_limit: Option<Duration>,

    /// Maximum framed payload size accepted in either direction.
    pub max_frame_size: usize,
}

impl FarmConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self {
            controller_rank: DEFAULT_CONTROLLER_RANK,
            time_limit: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the controller rank.
    pub fn with_controller_rank(mut self, rank: Rank) -> Self {
        self.controller_rank = rank;
        self
    }

    /// Set the wall-clock dispatch budget.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Remove the wall-clock dispatch budget.
    pub fn without_time_limit(mut self) -> Self {
        self.time_limit = None;
        self
    }

    /// Set the maximum framed payload size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self::new()
    }
}
