//! Source stage task: feeds the identifier queue from a record source.

use super::records::{IdentifierRecords, RecordOutcome, SkipReason};
use super::{SourceError, SourceProvider, SourceStats};
use crate::model::Identifier;
use crate::observer::{PipelineEvent, PipelineObserver, Stage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs [`read_source`] on a blocking thread (CSV parsing and file reads are synchronous).
pub fn spawn_source_reader(
    provider: Arc<dyn SourceProvider>,
    name: String,
    tx: mpsc::Sender<Identifier>,
    cancel: CancellationToken,
    observer: Arc<dyn PipelineObserver>,
) -> JoinHandle<Result<SourceStats, SourceError>> {
    tokio::task::spawn_blocking(move || {
        read_source(provider.as_ref(), &name, tx, &cancel, observer.as_ref())
    })
}

/// Opens `name`, sends every identifier into `tx`, and returns counters.
///
/// Takes `tx` by value: the identifier queue is closed when this returns,
/// whatever the reason. Must run outside the async executor (uses `blocking_send`).
pub fn read_source(
    provider: &dyn SourceProvider,
    name: &str,
    tx: mpsc::Sender<Identifier>,
    cancel: &CancellationToken,
    observer: &dyn PipelineObserver,
) -> Result<SourceStats, SourceError> {
    let input = provider.open(name)?;
    let records = IdentifierRecords::new(input)?;
    tracing::debug!(source = name, "source opened; header accepted");

    let mut stats = SourceStats::default();
    for outcome in records {
        if cancel.is_cancelled() {
            tracing::debug!(source = name, "source cancelled; no more identifiers");
            break;
        }
        match outcome {
            RecordOutcome::Identifier(id) => {
                if let Err(mpsc::error::SendError(id)) = tx.blocking_send(id) {
                    // Receiver gone: the fetch pool has stopped.
                    tracing::debug!(identifier = %id, "identifier queue closed; stopping source");
                    stats.abandoned += 1;
                    observer.on_event(&PipelineEvent::Abandoned {
                        identifier: id,
                        stage: Stage::Source,
                    });
                    break;
                }
                stats.emitted += 1;
            }
            RecordOutcome::Skipped { record, reason } => {
                match &reason {
                    SkipReason::Empty => {
                        stats.skipped_empty += 1;
                        tracing::info!(record, "skipping empty record");
                    }
                    SkipReason::Malformed(msg) => {
                        stats.skipped_malformed += 1;
                        tracing::warn!(record, error = %msg, "skipping invalid record");
                    }
                }
                observer.on_event(&PipelineEvent::RecordSkipped {
                    record,
                    reason: reason.to_string(),
                });
            }
        }
    }

    tracing::info!(
        source = name,
        emitted = stats.emitted,
        skipped_empty = stats.skipped_empty,
        skipped_malformed = stats.skipped_malformed,
        "source finished"
    );
    Ok(stats)
}
