//! Semaphore-backed concurrency limits.
//!
//! Limits both the objects running in one wave and the batches running in
//! one object. A permit is released when dropped.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Limits the number of concurrently running tasks.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    sem: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    /// A limiter with `max` slots. Zero is treated as one.
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            sem: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits for a free slot.
    ///
    /// Returns `None` if `cancel` fires first; a cancelled load never takes
    /// a new slot, even when one is free.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.sem.clone().acquire_owned() => permit.ok(),
        }
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.max - self.sem.available_permits()
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}
