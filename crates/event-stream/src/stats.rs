//! Stream statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Event stream statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Events accepted into a tier queue
    pub events_produced: u64,
    /// Events rejected because the stream was stopping or stopped
    pub events_rejected: u64,
    /// Events dropped because their tier queue was full
    pub events_dropped: u64,
    /// Events taken off a queue by a worker
    pub events_dispatched: u64,
    /// Dispatched events that had no subscribers
    pub events_unroutable: u64,
    /// Handler invocations spawned
    pub handler_invocations: u64,
    /// Handler invocations that panicked
    pub handler_failures: u64,
    /// Worker tasks currently running
    pub active_workers: usize,
    /// Topics with at least one subscription
    pub topics: usize,
    /// Active subscriptions
    pub active_subscriptions: usize,
}

/// Shared counters behind [`StreamStats`].
#[derive(Debug, Default)]
pub(crate) struct StreamMetrics {
    pub events_produced: AtomicU64,
    pub events_rejected: AtomicU64,
    pub events_dropped: AtomicU64,
    pub events_dispatched: AtomicU64,
    pub events_unroutable: AtomicU64,
    pub handler_invocations: AtomicU64,
    pub handler_failures: AtomicU64,
    pub active_workers: AtomicUsize,
}

impl StreamMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn worker_stopped(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Snapshot the counters. Registry counts are filled in by the caller.
    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            events_produced: self.events_produced.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_unroutable: self.events_unroutable.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::SeqCst),
            topics: 0,
            active_subscriptions: 0,
        }
    }
}
