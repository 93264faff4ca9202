//! Execution admission and bookkeeping

use parking_lot::Mutex;
use steprun_core::Harness;
use steprun_core::assist::Assistant;
use steprun_core::protocol::{DebugRequest, DebugResponse};
use tokio::sync::Semaphore;

/// Bounds how many debug requests run at once and counts their outcomes
pub struct ExecutionPool {
    harness: Harness,
    permits: Semaphore,
    max_concurrent: usize,
    stats: Mutex<PoolStats>,
}

#[derive(Debug, Default)]
struct PoolStats {
    in_flight: usize,
    completed: u64,
    failed: u64,
}

impl ExecutionPool {
    /// Create a pool admitting `max_concurrent` executions at a time
    #[must_use]
    pub fn new(harness: Harness, max_concurrent: usize) -> Self {
        Self {
            harness,
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Run one debug request once a slot is free
    ///
    /// Dropping the returned future gives the slot back and, through the
    /// harness, kills the child and removes its workspace.
    pub async fn debug(&self, request: &DebugRequest, assistant: &dyn Assistant) -> DebugResponse {
        // The semaphore is never closed.
        let Ok(_permit) = self.permits.acquire().await else {
            return DebugResponse::rejected("Execution pool is shut down");
        };

        let _slot = Slot::enter(&self.stats);
        let response = self.harness.debug(request, assistant).await;

        let mut stats = self.stats.lock();
        if response.error.is_empty() {
            stats.completed += 1;
        } else {
            stats.failed += 1;
        }
        response
    }

    /// Get pool status
    pub fn status(&self) -> PoolStatus {
        let stats = self.stats.lock();
        PoolStatus {
            in_flight: stats.in_flight,
            completed: stats.completed,
            failed: stats.failed,
            max_concurrent: self.max_concurrent,
        }
    }
}

/// Keeps `in_flight` honest even when the request future is dropped
struct Slot<'a>(&'a Mutex<PoolStats>);

impl<'a> Slot<'a> {
    fn enter(stats: &'a Mutex<PoolStats>) -> Self {
        stats.lock().in_flight += 1;
        Self(stats)
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

/// Status of the execution pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub max_concurrent: usize,
}
