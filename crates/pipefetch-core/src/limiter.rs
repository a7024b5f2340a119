//! Admission limiter bounding concurrent in-flight fetches.
//!
//! Workers acquire one unit before calling the fetcher and hold the returned
//! guard until the fetch has completed; dropping the guard releases the unit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Counting limiter with a fixed capacity. Cheap to clone (shared state).
#[derive(Debug, Clone)]
pub struct AdmissionLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionLimiter {
    /// Create a limiter with `capacity` units (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity)),
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Units currently held.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Highest `in_use` observed since creation.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Acquire)
    }

    /// Wait for a unit. Cancel-safe: dropping the future before it resolves takes nothing.
    pub async fn acquire(&self) -> Result<AdmissionGuard, AcquireError> {
        let permit = Arc::clone(&self.inner.semaphore).acquire_owned().await?;
        Ok(self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> AdmissionGuard {
        let now = self.inner.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak.fetch_max(now, Ordering::AcqRel);
        AdmissionGuard {
            inner: Arc::clone(&self.inner),
            _permit: permit,
        }
    }
}

/// Releases its unit when dropped.
#[derive(Debug)]
pub struct AdmissionGuard {
    inner: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        // Counter goes down before the permit is returned (field drop runs after this).
        self.inner.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_and_release() {
        let limiter = AdmissionLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_use(), 2);
        drop(a);
        assert_eq!(limiter.in_use(), 1);
        drop(b);
        assert_eq!(limiter.in_use(), 0);
        assert_eq!(limiter.peak(), 2);
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let limiter = AdmissionLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        let _held = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_use(), 1);
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let limiter = AdmissionLimiter::new(1);
        let held = limiter.acquire().await.unwrap();
        let l2 = limiter.clone();
        let waiter = tokio::spawn(async move {
            let _g = l2.acquire().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(limiter.in_use(), 0);
        assert_eq!(limiter.peak(), 1);
    }
}
