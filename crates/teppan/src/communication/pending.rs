use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;
use crate::error::SchedulerError;
use crate::stats::StatsRecorder;

/// # ResultSink
///
/// The single-write side of a request's result channel.
///
/// A sink can be written at most once: [`resolve`](Self::resolve) consumes it.
/// If a sink is dropped without ever being written, for instance because the
/// dispatch task unwound through a panicking backend, the drop writes a
/// [`SchedulerError::BackendFailure`] so the caller is never left waiting.
///
/// Each write also records the outcome in the scheduler's counters.
pub(crate) struct ResultSink<O> {
    sender: Option<oneshot::Sender<Result<O, SchedulerError>>>,
    stats: Arc<StatsRecorder>,
}

impl<O> ResultSink<O> {
    pub(crate) fn new(sender: oneshot::Sender<Result<O, SchedulerError>>, stats: Arc<StatsRecorder>) -> Self {
        Self {
            sender: Some(sender),
            stats,
        }
    }

    /// Writes the request's outcome.
    pub(crate) fn resolve(mut self, result: Result<O, SchedulerError>) {
        self.deliver(result);
    }

    fn deliver(&mut self, result: Result<O, SchedulerError>) {
        if let Some(sender) = self.sender.take() {
            self.stats.record_outcome(&result);
            if sender.send(result).is_err() {
                debug!("result handle dropped before resolution; discarding outcome");
            }
        }
    }
}

impl<O> Drop for ResultSink<O> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!("request dropped without a result; resolving as backend failure");
            self.deliver(Err(SchedulerError::BackendFailure(
                "dispatch aborted before a result was produced".to_string()
            )));
        }
    }
}

/// # PendingRequest
///
/// A caller's input paired with the sink its outcome is written to.
///
/// ## Type Parameters
///
/// * `I` - The input handed to the backend
/// * `O` - The output the caller is waiting for
pub(crate) struct PendingRequest<I, O> {
    id: Uuid,
    input: I,
    enqueued_at: Instant,
    expires_at: Option<Instant>,
    sink: ResultSink<O>,
}

impl<I, O> PendingRequest<I, O> {
    pub(crate) fn new(input: I, enqueued_at: Instant, expires_at: Option<Instant>, sink: ResultSink<O>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            enqueued_at,
            expires_at,
            sink,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub(crate) fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Whether the request's own deadline has passed at `now`.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Resolves the request without it ever reaching the backend.
    pub(crate) fn resolve(self, result: Result<O, SchedulerError>) {
        self.sink.resolve(result);
    }

    pub(crate) fn into_parts(self) -> (I, ResultSink<O>) {
        (self.input, self.sink)
    }
}
