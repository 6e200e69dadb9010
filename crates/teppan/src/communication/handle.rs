use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant, Sleep};
use uuid::Uuid;
use crate::error::SchedulerError;

/// Removes a still-queued request by id.
pub(crate) trait CancelQueued: Send + Sync {
    /// Returns `true` when the request was found in the queue and resolved as cancelled.
    fn cancel_queued(&self, id: Uuid) -> bool;

    /// Returns `true` when the request was found in the queue and resolved as timed out.
    fn expire_queued(&self, id: Uuid) -> bool;
}

/// # PendingResult
///
/// The caller's side of a submitted request.
///
/// `PendingResult` is a future resolving to the request's output or to the
/// [`SchedulerError`] that ended it. It can also be cancelled while the request
/// is still waiting in the queue; once the request has been placed in a batch
/// cancellation is no longer possible and the request resolves normally.
///
/// A request's queue deadline is enforced while the result is awaited, whether
/// or not the scheduler's dispatch loop is running.
///
/// Dropping an unresolved `PendingResult` cancels the request if it is still
/// queued.
pub struct PendingResult<O> {
    id: Uuid,
    receiver: oneshot::Receiver<Result<O, SchedulerError>>,
    queue: Weak<dyn CancelQueued>,
    expires_at: Option<Instant>,
    deadline: Option<Pin<Box<Sleep>>>,
    settled: bool,
}

impl<O> PendingResult<O> {
    pub(crate) fn new(
        id: Uuid,
        receiver: oneshot::Receiver<Result<O, SchedulerError>>,
        queue: Weak<dyn CancelQueued>,
        expires_at: Option<Instant>,
    ) -> Self {
        Self {
            id,
            receiver,
            queue,
            expires_at,
            deadline: None,
            settled: false,
        }
    }

    /// Unique id of the underlying request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancels the request if it has not been batched yet.
    ///
    /// Returns `true` if the request was removed from the queue, in which case
    /// it resolves with [`SchedulerError::Cancelled`] and never reaches the
    /// backend. Returns `false` if it was already batched or resolved.
    pub fn cancel(&self) -> bool {
        if self.settled {
            return false;
        }
        self.queue.upgrade()
            .is_some_and(|queue| queue.cancel_queued(self.id))
    }

    /// Waits for the request's outcome.
    pub async fn await_result(self) -> Result<O, SchedulerError> {
        self.await
    }
}

impl<O> Future for PendingResult<O> {
    type Output = Result<O, SchedulerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(result) = this.poll_receiver(cx) {
            return Poll::Ready(result);
        }

        let Some(at) = this.expires_at else {
            return Poll::Pending;
        };
        // created on first poll so constructing a handle needs no runtime
        let deadline = this.deadline.get_or_insert_with(|| Box::pin(sleep_until(at)));
        if deadline.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }

        this.expires_at = None;
        this.deadline = None;
        // already batched requests are bounded by the backend timeout instead
        if this.queue.upgrade().is_some_and(|queue| queue.expire_queued(this.id)) {
            return this.poll_receiver(cx);
        }
        Poll::Pending
    }
}

impl<O> PendingResult<O> {
    fn poll_receiver(&mut self, cx: &mut Context<'_>) -> Poll<Result<O, SchedulerError>> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                self.settled = true;
                // sinks always write before closing, so a bare close only happens on teardown
                Poll::Ready(result.unwrap_or_else(|_| Err(SchedulerError::ShuttingDown)))
            }
        }
    }
}

impl<O> Drop for PendingResult<O> {
    fn drop(&mut self) {
        if !self.settled {
            self.cancel();
        }
    }
}

impl<O> std::fmt::Debug for PendingResult<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish()
    }
}
