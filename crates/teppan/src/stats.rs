use std::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;
use crate::error::SchedulerError;

/// Point-in-time counters for a [`Scheduler`](crate::Scheduler).
///
/// Every submitted request is counted exactly once in one of the outcome
/// counters when it resolves, so
/// `submitted - (completed + failed + timed_out + cancelled + rejected)`
/// is the number of requests still queued or in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub batches_dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub rejected: u64,
}

impl SchedulerStats {
    /// Requests not yet resolved.
    pub fn pending(&self) -> u64 {
        self.submitted.saturating_sub(
            self.completed + self.failed + self.timed_out + self.cancelled + self.rejected
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    submitted: AtomicU64,
    batches_dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome<O>(&self, outcome: &Result<O, SchedulerError>) {
        let counter = match outcome {
            Ok(_) => &self.completed,
            Err(SchedulerError::QueueTimeout(_) | SchedulerError::BackendTimeout(_)) => &self.timed_out,
            Err(SchedulerError::Cancelled) => &self.cancelled,
            Err(SchedulerError::ShuttingDown) => &self.rejected,
            Err(SchedulerError::BackendFailure(_) | SchedulerError::BackendContractViolation { .. }) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
