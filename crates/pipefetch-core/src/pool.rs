//! Fetch stage: a fixed set of workers draining the identifier queue.
//!
//! Each worker loops: take an identifier, acquire an admission unit, fetch,
//! release, classify. Payloads go to the payload queue; empty and failed
//! outcomes are logged, reported, and dropped. Workers stop when the
//! identifier queue is closed and drained, or when the pipeline is cancelled.
//!
//! The payload queue closes when the last sender is dropped. Workers own the
//! only clones besides the pool's, and the pool drops its own after joining
//! every worker, so nothing can be sent once the queue is closed.

use crate::fetch::{classify, FetchError, Fetcher};
use crate::limiter::AdmissionLimiter;
use crate::model::{FetchOutcome, Identifier, Payload};
use crate::observer::{DropReason, PipelineEvent, PipelineObserver, Stage};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Identifier queue shared by all workers of one pool.
type SharedIds = Arc<Mutex<mpsc::Receiver<Identifier>>>;

/// Counters returned by the fetch stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Identifiers taken off the queue.
    pub dispatched: u64,
    /// Payloads handed to the persist stage.
    pub payloads: u64,
    pub empty: u64,
    pub failed: u64,
    /// Identifiers given up on because of cancellation.
    pub abandoned: u64,
}

impl FetchStats {
    fn merge(&mut self, other: FetchStats) {
        self.dispatched += other.dispatched;
        self.payloads += other.payloads;
        self.empty += other.empty;
        self.failed += other.failed;
        self.abandoned += other.abandoned;
    }
}

/// What every worker needs; shared behind one `Arc`.
struct WorkerShared {
    fetcher: Arc<dyn Fetcher>,
    limiter: AdmissionLimiter,
    observer: Arc<dyn PipelineObserver>,
}

pub struct FetchPool {
    shared: Arc<WorkerShared>,
    workers: usize,
}

impl FetchPool {
    /// Pool of `workers` tasks (at least 1) admitting fetches through `limiter`.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        limiter: AdmissionLimiter,
        workers: usize,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                fetcher,
                limiter,
                observer,
            }),
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.shared.limiter
    }

    pub fn spawn(
        self,
        ids: mpsc::Receiver<Identifier>,
        payloads: mpsc::Sender<Payload>,
        cancel: CancellationToken,
    ) -> JoinHandle<FetchStats> {
        tokio::spawn(self.run(ids, payloads, cancel))
    }

    /// Runs all workers to completion, then closes the payload queue.
    /// A worker panic is re-raised after the others have finished.
    pub async fn run(
        self,
        ids: mpsc::Receiver<Identifier>,
        payloads: mpsc::Sender<Payload>,
        cancel: CancellationToken,
    ) -> FetchStats {
        let ids: SharedIds = Arc::new(Mutex::new(ids));
        let mut set = JoinSet::new();
        for worker_id in 0..self.workers {
            set.spawn(fetch_worker(
                worker_id,
                Arc::clone(&self.shared),
                Arc::clone(&ids),
                payloads.clone(),
                cancel.clone(),
            ));
        }
        tracing::debug!(workers = self.workers, limit = self.shared.limiter.capacity(), "fetch pool started");

        let mut stats = FetchStats::default();
        let mut panic = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(e) if e.is_panic() => {
                    tracing::error!("fetch worker panicked");
                    panic.get_or_insert(e.into_panic());
                }
                Err(e) => tracing::error!(error = %e, "fetch worker task failed"),
            }
        }

        // Join barrier passed: close both queues from this side.
        drop(ids);
        drop(payloads);
        self.shared.observer.on_event(&PipelineEvent::PayloadQueueClosed);
        tracing::info!(
            dispatched = stats.dispatched,
            payloads = stats.payloads,
            empty = stats.empty,
            failed = stats.failed,
            abandoned = stats.abandoned,
            peak_in_flight = self.shared.limiter.peak(),
            "fetch pool finished"
        );

        if let Some(p) = panic {
            std::panic::resume_unwind(p);
        }
        stats
    }
}

async fn next_identifier(ids: &SharedIds) -> Option<Identifier> {
    ids.lock().await.recv().await
}

fn abandon(shared: &WorkerShared, stats: &mut FetchStats, identifier: Identifier) {
    tracing::debug!(identifier = %identifier, "fetch abandoned on cancellation");
    stats.abandoned += 1;
    shared.observer.on_event(&PipelineEvent::Abandoned {
        identifier,
        stage: Stage::Fetch,
    });
}

async fn fetch_worker(
    worker_id: usize,
    shared: Arc<WorkerShared>,
    ids: SharedIds,
    payloads: mpsc::Sender<Payload>,
    cancel: CancellationToken,
) -> FetchStats {
    let mut stats = FetchStats::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            id = next_identifier(&ids) => id,
        };
        let Some(identifier) = next else {
            break;
        };
        stats.dispatched += 1;

        let admission = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = shared.limiter.acquire() => guard.ok(),
        };
        let Some(admission) = admission else {
            abandon(&shared, &mut stats, identifier);
            break;
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = shared.fetcher.fetch(&identifier, &cancel) => Some(r),
        };
        drop(admission);
        let result = match result {
            None | Some(Err(FetchError::Cancelled)) => {
                abandon(&shared, &mut stats, identifier);
                break;
            }
            Some(r) => r,
        };

        match classify(result) {
            FetchOutcome::Payload(bytes) => {
                let size = bytes.len();
                let payload = Payload {
                    source: identifier.clone(),
                    bytes,
                };
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    r = payloads.send(payload) => r.is_ok(),
                };
                if !sent {
                    abandon(&shared, &mut stats, identifier);
                    break;
                }
                stats.payloads += 1;
                tracing::debug!(worker_id, identifier = %identifier, bytes = size, "fetched");
                shared.observer.on_event(&PipelineEvent::Fetched {
                    identifier,
                    bytes: size,
                });
            }
            FetchOutcome::Empty => {
                stats.empty += 1;
                tracing::info!(identifier = %identifier, "empty content; dropping");
                shared.observer.on_event(&PipelineEvent::Dropped {
                    identifier,
                    reason: DropReason::Empty,
                });
            }
            FetchOutcome::Failed(reason) => {
                stats.failed += 1;
                tracing::warn!(identifier = %identifier, reason = %reason, "error downloading; dropping");
                shared.observer.on_event(&PipelineEvent::Dropped {
                    identifier,
                    reason: DropReason::Failed(reason),
                });
            }
        }
    }
    tracing::trace!(worker_id, "fetch worker exiting");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResponse;
    use crate::observer::RecordingObserver;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StaticFetcher {
        body: &'static str,
        status: u32,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(
            &self,
            _identifier: &Identifier,
            _cancel: &CancellationToken,
        ) -> Result<FetchResponse, FetchError> {
            Ok(FetchResponse::new(self.status, self.body))
        }
    }

    fn pool(fetcher: impl Fetcher + 'static, n: usize) -> (FetchPool, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let pool = FetchPool::new(Arc::new(fetcher), AdmissionLimiter::new(n), n, observer.clone());
        (pool, observer)
    }

    async fn feed(ids: &[&str], cap: usize) -> mpsc::Receiver<Identifier> {
        let (tx, rx) = mpsc::channel(cap);
        for (i, id) in ids.iter().enumerate() {
            tx.send(Identifier::new(*id, i as u64 + 1)).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn forwards_payloads_and_closes_queue() {
        let (pool, observer) = pool(StaticFetcher { body: "mock response", status: 200 }, 2);
        let ids = feed(&["http://example.com", "http://test.com"], 2).await;
        let (tx, mut rx) = mpsc::channel(2);
        let handle = pool.spawn(ids, tx, CancellationToken::new());

        let mut got = Vec::new();
        let collect = async {
            while let Some(p) = rx.recv().await {
                got.push(p);
            }
        };
        tokio::time::timeout(Duration::from_secs(2), collect).await.unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|p| p.bytes == b"mock response"));
        assert_eq!(stats.payloads, 2);
        assert_eq!(stats.dispatched, 2);
        assert_eq!(
            observer.filter(|e| *e == PipelineEvent::PayloadQueueClosed).len(),
            1
        );
    }

    #[tokio::test]
    async fn error_status_is_dropped() {
        let (pool, observer) = pool(StaticFetcher { body: "", status: 500 }, 1);
        let ids = feed(&["http://badresponse.com"], 1).await;
        let (tx, mut rx) = mpsc::channel(1);
        let stats = pool.run(ids, tx, CancellationToken::new()).await;
        assert!(rx.recv().await.is_none());
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.payloads, 0);
        let dropped = observer.filter(|e| matches!(e, PipelineEvent::Dropped { .. }));
        assert_eq!(dropped.len(), 1);
    }

    #[tokio::test]
    async fn empty_body_is_dropped() {
        let (pool, _) = pool(StaticFetcher { body: "", status: 200 }, 1);
        let ids = feed(&["http://empty"], 1).await;
        let (tx, mut rx) = mpsc::channel(1);
        let stats = pool.run(ids, tx, CancellationToken::new()).await;
        assert!(rx.recv().await.is_none());
        assert_eq!(stats.empty, 1);
    }

    #[tokio::test]
    async fn cancelled_pool_abandons_and_closes() {
        struct Hang;
        #[async_trait]
        impl Fetcher for Hang {
            async fn fetch(
                &self,
                _identifier: &Identifier,
                cancel: &CancellationToken,
            ) -> Result<FetchResponse, FetchError> {
                cancel.cancelled().await;
                Err(FetchError::Cancelled)
            }
        }

        let (pool, observer) = pool(Hang, 2);
        let ids = feed(&["http://a", "http://b", "http://c"], 3).await;
        let (tx, mut rx) = mpsc::channel::<Payload>(1);
        let cancel = CancellationToken::new();
        let handle = pool.spawn(ids, tx, cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.payloads, 0);
        assert_eq!(
            observer
                .filter(|e| matches!(e, PipelineEvent::Abandoned { stage: Stage::Fetch, .. }))
                .len(),
            2
        );
    }
}
