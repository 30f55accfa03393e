//! Bounded-concurrency probe scheduler.

pub mod engine;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::probes::ProbeStatistics;

pub use self::engine::ProbeScheduler;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch `{program}` for {address}: {source}")]
    Launch {
        program: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Snapshot of a running batch. `completed` never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub in_flight: usize,
}

impl Progress {
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// Result of probing a candidate list: one record per candidate, in input order.
#[derive(Debug, Serialize)]
pub struct ProbeBatch {
    pub statistics: Vec<ProbeStatistics>,
    /// Highest number of probes that were in flight at once.
    pub peak_in_flight: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl ProbeBatch {
    pub fn successes(&self) -> usize {
        self.statistics.iter().filter(|s| s.is_success()).count()
    }
}
