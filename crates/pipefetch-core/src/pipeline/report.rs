//! What a finished run hands back to the caller.

use crate::persist::PersistStats;
use crate::pool::FetchStats;
use crate::source::{SourceError, SourceStats};
use std::time::Duration;

/// How a run that did not abort ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every stage drained its input.
    Completed,
    /// The deadline fired; outstanding work was cancelled.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub elapsed: Duration,
    pub source: SourceStats,
    pub fetch: FetchStats,
    pub persist: PersistStats,
    /// Highest number of fetches admitted at once.
    pub peak_in_flight: usize,
}

impl PipelineReport {
    pub fn timed_out(&self) -> bool {
        self.outcome == PipelineOutcome::TimedOut
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("{stage} stage failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },
}
