use std::time::Duration;
use thiserror::Error;

/// Terminal outcome of a submitted request that did not produce an output.
///
/// Every request resolves exactly once, either with its output or with one of
/// these kinds. The type is `Clone` because a whole-batch failure is fanned out
/// to every member of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The backend call failed for the whole batch, or for this item when the
    /// backend reports per-item outcomes.
    #[error("backend failure: {0}")]
    BackendFailure(String),

    /// The backend returned a different number of outputs than it was given inputs.
    #[error("backend contract violation: expected {expected} outputs, got {actual}")]
    BackendContractViolation { expected: usize, actual: usize },

    /// The request's own deadline elapsed while it was still queued.
    #[error("request timed out after {0:?} in queue")]
    QueueTimeout(Duration),

    /// The backend call for the batch containing this request exceeded its budget.
    #[error("backend call timed out after {0:?}")]
    BackendTimeout(Duration),

    /// The caller cancelled the request before it was batched.
    #[error("request cancelled")]
    Cancelled,

    /// The scheduler was shutting down when the request was submitted or still pending.
    #[error("scheduler shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    /// Whether this is either timeout kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedulerError::QueueTimeout(_) | SchedulerError::BackendTimeout(_))
    }

    /// Whether this error originated from the backend rather than the scheduler.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            SchedulerError::BackendFailure(_)
                | SchedulerError::BackendContractViolation { .. }
                | SchedulerError::BackendTimeout(_)
        )
    }
}

/// Rejected scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
}
