//! Aggregate queue counters.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    enqueued: u64,
    processing: u64,
    completed: u64,
    failed: u64,
    retrying: u64,
    cleared: u64,
    avg_processing_time_ms: f64,
}

/// Point-in-time view of the queue.
///
/// `pending` counts queued jobs plus jobs waiting out their retry delay
/// (`retrying` is that share). Outside of in-flight transitions:
/// `completed + failed + pending + processing + cleared == enqueued`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    pub enqueued: u64,
    pub cleared: u64,
    pub avg_processing_time_ms: f64,
}

impl StatsSnapshot {
    /// Jobs that reached a terminal state or were dropped administratively.
    pub fn settled(&self) -> u64 {
        self.completed + self.failed + self.cleared
    }
}

/// Shared counters, updated by every worker of every tier.
#[derive(Debug, Default)]
pub struct StatsCollector {
    inner: Mutex<Counters>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_enqueue(&self) {
        self.lock().enqueued += 1;
    }

    pub fn record_claim(&self) {
        self.lock().processing += 1;
    }

    /// A claimed job finished successfully after `duration_ms`.
    pub fn record_success(&self, duration_ms: f64) {
        let mut c = self.lock();
        c.processing = c.processing.saturating_sub(1);
        c.completed += 1;
        let n = c.completed as f64;
        c.avg_processing_time_ms += (duration_ms - c.avg_processing_time_ms) / n;
    }

    /// A claimed job failed for the last time.
    pub fn record_failure(&self) {
        let mut c = self.lock();
        c.processing = c.processing.saturating_sub(1);
        c.failed += 1;
    }

    /// A claimed job failed and is waiting for its retry delay.
    pub fn record_retry_scheduled(&self) {
        let mut c = self.lock();
        c.processing = c.processing.saturating_sub(1);
        c.retrying += 1;
    }

    /// A delayed retry went back into its queue.
    pub fn record_retry_fired(&self) {
        let mut c = self.lock();
        c.retrying = c.retrying.saturating_sub(1);
    }

    /// `queued` jobs and `scheduled` retries were dropped by an administrative clear.
    pub fn record_cleared(&self, queued: usize, scheduled: usize) {
        let mut c = self.lock();
        c.retrying = c.retrying.saturating_sub(scheduled as u64);
        c.cleared += (queued + scheduled) as u64;
    }

    /// Combine the counters with the current total queue length.
    pub fn snapshot(&self, queued: usize) -> StatsSnapshot {
        let c = self.lock();
        StatsSnapshot {
            pending: queued as u64 + c.retrying,
            processing: c.processing,
            completed: c.completed,
            failed: c.failed,
            retrying: c.retrying,
            enqueued: c.enqueued,
            cleared: c.cleared,
            avg_processing_time_ms: c.avg_processing_time_ms,
        }
    }
}
