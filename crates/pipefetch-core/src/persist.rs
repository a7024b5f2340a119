//! Persist stage: single consumer writing payloads to storage.

use crate::checksum;
use crate::model::Payload;
use crate::observer::{PipelineEvent, PipelineObserver, Stage};
use crate::storage::{KeyGenerator, Storage, StorageError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counters returned by the persist stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub persisted: u64,
    pub failed: u64,
    /// Payloads left unwritten because of a hard stop.
    pub abandoned: u64,
    /// Total bytes written.
    pub bytes: u64,
}

pub struct PersistWorker {
    storage: Arc<dyn Storage>,
    keys: Arc<dyn KeyGenerator>,
    observer: Arc<dyn PipelineObserver>,
}

impl PersistWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        keys: Arc<dyn KeyGenerator>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            storage,
            keys,
            observer,
        }
    }

    pub fn spawn(
        self,
        payloads: mpsc::Receiver<Payload>,
        hard_stop: CancellationToken,
    ) -> JoinHandle<PersistStats> {
        tokio::spawn(self.run(payloads, hard_stop))
    }

    /// Drains `payloads` until the queue is closed, or until `hard_stop` fires.
    /// Storage failures are logged and the payload dropped; nothing is retried.
    pub async fn run(
        self,
        mut payloads: mpsc::Receiver<Payload>,
        hard_stop: CancellationToken,
    ) -> PersistStats {
        let mut stats = PersistStats::default();
        loop {
            let payload = tokio::select! {
                biased;
                _ = hard_stop.cancelled() => break,
                next = payloads.recv() => match next {
                    Some(p) => p,
                    None => break,
                },
            };
            if !self.persist(payload, &hard_stop, &mut stats).await {
                break;
            }
        }

        if hard_stop.is_cancelled() {
            payloads.close();
            while let Ok(payload) = payloads.try_recv() {
                self.abandon(payload, &mut stats);
            }
        }

        tracing::info!(
            persisted = stats.persisted,
            failed = stats.failed,
            abandoned = stats.abandoned,
            bytes = stats.bytes,
            "persist worker finished"
        );
        stats
    }

    /// Saves one payload. Returns false on hard stop, whether or not storage noticed it.
    async fn persist(
        &self,
        payload: Payload,
        hard_stop: &CancellationToken,
        stats: &mut PersistStats,
    ) -> bool {
        let key = self.keys.next_key();
        let saved = tokio::select! {
            biased;
            _ = hard_stop.cancelled() => Err(StorageError::Cancelled),
            r = self.storage.save(&key, &payload.bytes, hard_stop) => r,
        };
        match saved {
            Ok(path) => {
                stats.persisted += 1;
                stats.bytes += payload.len() as u64;
                tracing::debug!(key = %key, identifier = %payload.source, bytes = payload.len(), "saved");
                self.observer.on_event(&PipelineEvent::Persisted {
                    sha256: checksum::sha256_bytes(&payload.bytes),
                    bytes: payload.len(),
                    identifier: payload.source,
                    key,
                    path,
                });
                true
            }
            Err(StorageError::Cancelled) => {
                self.abandon(payload, stats);
                false
            }
            Err(e) => {
                stats.failed += 1;
                tracing::error!(key = %key, identifier = %payload.source, error = %e, "error saving file");
                self.observer.on_event(&PipelineEvent::PersistFailed {
                    identifier: payload.source,
                    key,
                    error: e.to_string(),
                });
                true
            }
        }
    }

    fn abandon(&self, payload: Payload, stats: &mut PersistStats) {
        stats.abandoned += 1;
        tracing::debug!(identifier = %payload.source, "payload abandoned on hard stop");
        self.observer.on_event(&PipelineEvent::Abandoned {
            identifier: payload.source,
            stage: Stage::Persist,
        });
    }
}
