//! Orchestrator: wires the three stages together and owns the deadline.
//!
//! ```text
//! source ──ids(bounded)──▶ fetch pool (N admitted) ──payloads(bounded)──▶ persist
//! ```
//!
//! Two cancellation tokens control shutdown. `cancel` (a child of
//! `hard_stop`) fires on the deadline or a fatal error: the source stops
//! reading and fetch workers abandon what they hold. The persist worker keeps
//! draining buffered payloads until its queue closes or `hard_stop` fires,
//! `drain_grace` after `cancel`.

mod report;
mod state;

pub use report::{PipelineError, PipelineOutcome, PipelineReport};
pub use state::PipelineState;

use crate::config::PipelineConfig;
use crate::fetch::{CurlFetcher, Fetcher};
use crate::limiter::AdmissionLimiter;
use crate::observer::{PipelineEvent, PipelineObserver, TracingObserver};
use crate::persist::{PersistStats, PersistWorker};
use crate::pool::{FetchPool, FetchStats};
use crate::source::{spawn_source_reader, FsSourceProvider, SourceProvider, SourceStats};
use crate::storage::{KeyGenerator, SequentialKeys, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stand-in for "no deadline" on an unarmed timer.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Collects collaborators for a [`Pipeline`]. Everything but storage has a default.
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Arc<dyn SourceProvider>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    storage: Option<Arc<dyn Storage>>,
    keys: Option<Arc<dyn KeyGenerator>>,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            source: None,
            fetcher: None,
            storage: None,
            keys: None,
            observer: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn SourceProvider>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn keys(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.config
            .validate()
            .map_err(|e| PipelineError::Config(format!("{:#}", e)))?;
        let storage = self
            .storage
            .ok_or_else(|| PipelineError::Config("no storage configured".into()))?;
        let config = self.config;
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(FsSourceProvider::new()));
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(CurlFetcher::new(config.fetch.clone())));
        let keys = self
            .keys
            .unwrap_or_else(|| Arc::new(SequentialKeys::new(config.file_extension.clone())));
        let observer = self.observer.unwrap_or_else(|| Arc::new(TracingObserver));
        let limiter = AdmissionLimiter::new(config.max_in_flight);
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Ok(Pipeline {
            config,
            source,
            fetcher,
            storage,
            keys,
            observer,
            limiter,
            state_tx,
        })
    }
}

/// One run of the fetch-and-persist pipeline. [`Pipeline::run`] consumes it.
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn SourceProvider>,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn Storage>,
    keys: Arc<dyn KeyGenerator>,
    observer: Arc<dyn PipelineObserver>,
    limiter: AdmissionLimiter,
    state_tx: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current state; stays readable after the run ends (last value is `Terminated`).
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    /// The admission limiter shared by the fetch workers.
    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    fn transition(&self, next: PipelineState) {
        let prev = *self.state_tx.borrow();
        debug_assert!(
            prev.can_transition_to(next),
            "invalid transition {} -> {}",
            prev,
            next
        );
        self.state_tx.send_replace(next);
        tracing::debug!(from = %prev, to = %next, "pipeline state");
        self.observer.on_event(&PipelineEvent::StateChanged(next));
    }

    /// Runs every stage to completion, or until the deadline or a fatal error.
    ///
    /// Returns `Ok` for completed and timed-out runs, `Err` for aborted ones.
    /// Only returns once all three stages have exited.
    pub async fn run(self, source_name: &str) -> Result<PipelineReport, PipelineError> {
        let started = Instant::now();
        let hard_stop = CancellationToken::new();
        let cancel = hard_stop.child_token();
        let (id_tx, id_rx) = mpsc::channel(self.config.identifier_queue_capacity);
        let (payload_tx, payload_rx) = mpsc::channel(self.config.payload_queue_capacity);

        let mut source = spawn_source_reader(
            Arc::clone(&self.source),
            source_name.to_string(),
            id_tx,
            cancel.clone(),
            Arc::clone(&self.observer),
        );
        let mut fetch = FetchPool::new(
            Arc::clone(&self.fetcher),
            self.limiter.clone(),
            self.config.worker_count(),
            Arc::clone(&self.observer),
        )
        .spawn(id_rx, payload_tx, cancel.clone());
        let mut persist = PersistWorker::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.keys),
            Arc::clone(&self.observer),
        )
        .spawn(payload_rx, hard_stop.clone());
        self.transition(PipelineState::Running);
        tracing::info!(
            source = source_name,
            max_in_flight = self.limiter.capacity(),
            workers = self.config.worker_count(),
            deadline_secs = ?self.config.deadline_secs,
            "pipeline started"
        );

        let deadline = tokio::time::sleep(self.config.deadline().unwrap_or(FAR_FUTURE));
        let grace = tokio::time::sleep(FAR_FUTURE);
        tokio::pin!(deadline, grace);
        let mut deadline_armed = self.config.deadline().is_some();
        let mut grace_armed = false;

        let mut source_stats: Option<SourceStats> = None;
        let mut fetch_stats: Option<FetchStats> = None;
        let mut persist_stats: Option<PersistStats> = None;
        let mut fatal: Option<PipelineError> = None;
        let mut timed_out = false;

        while source_stats.is_none() || fetch_stats.is_none() || persist_stats.is_none() {
            let mut stop = false;
            tokio::select! {
                joined = &mut source, if source_stats.is_none() => {
                    let stats = match joined {
                        Ok(Ok(stats)) => stats,
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "source failed; aborting pipeline");
                            fatal.get_or_insert(PipelineError::Source(e));
                            stop = true;
                            SourceStats::default()
                        }
                        Err(e) => {
                            fatal.get_or_insert(stage_failure("source", e));
                            stop = true;
                            SourceStats::default()
                        }
                    };
                    source_stats = Some(stats);
                }
                joined = &mut fetch, if fetch_stats.is_none() => {
                    fetch_stats = Some(joined.unwrap_or_else(|e| {
                        fatal.get_or_insert(stage_failure("fetch", e));
                        stop = true;
                        FetchStats::default()
                    }));
                }
                joined = &mut persist, if persist_stats.is_none() => {
                    persist_stats = Some(joined.unwrap_or_else(|e| {
                        fatal.get_or_insert(stage_failure("persist", e));
                        stop = true;
                        PersistStats::default()
                    }));
                }
                _ = &mut deadline, if deadline_armed => {
                    deadline_armed = false;
                    if !cancel.is_cancelled() {
                        tracing::warn!(elapsed_ms = started.elapsed().as_millis() as u64, "deadline reached; cancelling outstanding work");
                        timed_out = true;
                        stop = true;
                    }
                }
                _ = &mut grace, if grace_armed => {
                    grace_armed = false;
                    tracing::warn!("drain grace elapsed; abandoning buffered payloads");
                    hard_stop.cancel();
                }
            }

            if stop && !cancel.is_cancelled() {
                cancel.cancel();
                grace
                    .as_mut()
                    .reset(Instant::now() + self.config.drain_grace());
                grace_armed = true;
            }
        }

        let outcome_state = if fatal.is_some() {
            PipelineState::Aborted
        } else if timed_out {
            PipelineState::TimedOut
        } else {
            PipelineState::Completed
        };
        self.transition(outcome_state);
        self.transition(PipelineState::Terminated);

        let report = PipelineReport {
            outcome: if timed_out {
                PipelineOutcome::TimedOut
            } else {
                PipelineOutcome::Completed
            },
            elapsed: started.elapsed(),
            source: source_stats.unwrap_or_default(),
            fetch: fetch_stats.unwrap_or_default(),
            persist: persist_stats.unwrap_or_default(),
            peak_in_flight: self.limiter.peak(),
        };
        tracing::info!(
            state = %outcome_state,
            elapsed_ms = report.elapsed.as_millis() as u64,
            emitted = report.source.emitted,
            fetched = report.fetch.payloads,
            dropped = report.fetch.empty + report.fetch.failed,
            persisted = report.persist.persisted,
            abandoned = report.source.abandoned + report.fetch.abandoned + report.persist.abandoned,
            peak_in_flight = report.peak_in_flight,
            "pipeline finished"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

fn stage_failure(stage: &'static str, e: JoinError) -> PipelineError {
    let message = if e.is_panic() {
        let panic = e.into_panic();
        panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panicked".to_string())
    } else {
        e.to_string()
    };
    tracing::error!(stage, error = %message, "stage task failed; aborting pipeline");
    PipelineError::Stage { stage, message }
}
