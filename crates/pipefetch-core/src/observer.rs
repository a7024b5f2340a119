//! Structured pipeline events.
//!
//! Every stage reports what happened to each item through a
//! [`PipelineObserver`] in addition to logging, so callers (and tests) can
//! query failures instead of scraping log text.

use crate::model::{FailureReason, Identifier, StorageKey};
use crate::pipeline::PipelineState;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Why an identifier produced no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Fetch succeeded with a zero-length body.
    Empty,
    Failed(FailureReason),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Empty => f.write_str("empty body"),
            DropReason::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

/// Which stage abandoned an item on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Fetch,
    Persist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    /// A source record was skipped (empty identifier or malformed record).
    RecordSkipped { record: u64, reason: String },
    /// A fetch produced a payload that was handed to the persist stage.
    Fetched { identifier: Identifier, bytes: usize },
    /// A fetch produced no payload; the identifier is dropped.
    Dropped {
        identifier: Identifier,
        reason: DropReason,
    },
    /// Payload written to storage.
    Persisted {
        identifier: Identifier,
        key: StorageKey,
        path: PathBuf,
        bytes: usize,
        sha256: String,
    },
    /// Storage refused or failed the write; payload dropped.
    PersistFailed {
        identifier: Identifier,
        key: StorageKey,
        error: String,
    },
    /// Item abandoned because the pipeline was cancelled.
    Abandoned { identifier: Identifier, stage: Stage },
    /// Fetch pool finished and closed the payload queue.
    PayloadQueueClosed,
}

/// Receives pipeline events. Called from stage tasks; must not block for long.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Logs every event at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StateChanged(state) => tracing::debug!(?state, "pipeline state"),
            PipelineEvent::Persisted { key, identifier, bytes, .. } => {
                tracing::trace!(%key, %identifier, bytes, "persisted");
            }
            PipelineEvent::PersistFailed { key, error, .. } => {
                tracing::trace!(%key, error = %error, "persist failed");
            }
            other => tracing::trace!(event = ?other, "pipeline event"),
        }
    }
}

/// Forwards each event to several observers in order.
#[derive(Default, Clone)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl PipelineObserver for FanoutObserver {
    fn on_event(&self, event: &PipelineEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// Keeps every event in memory. Meant for tests and small runs.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events matching `pred`.
    pub fn filter<F>(&self, pred: F) -> Vec<PipelineEvent>
    where
        F: Fn(&PipelineEvent) -> bool,
    {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }

    pub fn states(&self) -> Vec<PipelineState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
