//! Pipeline counters shared by the scheduler, dispatcher and sweeper.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated by the pipeline tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    rounds_completed: AtomicU64,
    artifacts_captured: AtomicU64,
    capture_failures: AtomicU64,
    samples_taken: AtomicU64,
    dropped_on_full: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    fallback_writes: AtomicU64,
    files_removed: AtomicU64,
    removal_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub rounds_completed: u64,
    pub artifacts_captured: u64,
    pub capture_failures: u64,
    pub samples_taken: u64,
    pub dropped_on_full: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub fallback_writes: u64,
    pub files_removed: u64,
    pub removal_failures: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub(crate) fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_round, rounds_completed);
    counter!(record_capture, artifacts_captured);
    counter!(record_capture_failure, capture_failures);
    counter!(record_sample, samples_taken);
    counter!(record_drop, dropped_on_full);
    counter!(record_dispatch, dispatched);
    counter!(record_dispatch_failure, dispatch_failures);
    counter!(record_fallback, fallback_writes);
    counter!(record_removal, files_removed);
    counter!(record_removal_failure, removal_failures);

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rounds_completed: self.rounds_completed.load(Ordering::Relaxed),
            artifacts_captured: self.artifacts_captured.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            samples_taken: self.samples_taken.load(Ordering::Relaxed),
            dropped_on_full: self.dropped_on_full.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            fallback_writes: self.fallback_writes.load(Ordering::Relaxed),
            files_removed: self.files_removed.load(Ordering::Relaxed),
            removal_failures: self.removal_failures.load(Ordering::Relaxed),
        }
    }
}
