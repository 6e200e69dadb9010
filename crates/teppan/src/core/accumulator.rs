//! Debounced micro-batch formation.
//!
//! The accumulator holds the queue of requests that have been submitted but not
//! yet batched. A batch becomes ready when either the queue reaches
//! `max_batch_size` or the oldest queued request has waited `max_queue_delay`.
//! The deadline is always derived from the request currently at the front of
//! the queue, so a burst after an idle period starts a fresh window.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::debug;
use uuid::Uuid;
use crate::communication::{CancelQueued, PendingRequest};
use crate::error::SchedulerError;
use crate::scheduler::ShutdownMode;
use super::batch::Batch;

struct BatcherState<I, O> {
    queue: VecDeque<PendingRequest<I, O>>,
    closed: bool,
}

enum Readiness<I, O> {
    Ready(Batch<I, O>),
    Wait(Option<Instant>),
    Closed,
}

impl<I, O> BatcherState<I, O> {
    fn take_expired(&mut self, now: Instant) -> VecDeque<PendingRequest<I, O>> {
        if !self.queue.iter().any(|r| r.is_expired(now)) {
            return VecDeque::new();
        }
        let (expired, kept): (VecDeque<_>, VecDeque<_>) = self.queue
            .drain(..)
            .partition(|r| r.is_expired(now));
        self.queue = kept;
        expired
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.queue.iter().filter_map(PendingRequest::expires_at).min()
    }

    fn take_ready(&mut self, now: Instant, max_batch_size: usize, max_queue_delay: Duration) -> Readiness<I, O> {
        let Some(oldest) = self.queue.front() else {
            return if self.closed { Readiness::Closed } else { Readiness::Wait(None) };
        };

        let deadline = oldest.enqueued_at().checked_add(max_queue_delay);
        let delay_elapsed = deadline.is_some_and(|at| at <= now);

        // a closed queue that still holds requests is draining
        if self.closed || delay_elapsed || self.queue.len() >= max_batch_size {
            let take = self.queue.len().min(max_batch_size);
            let requests = self.queue.drain(..take).collect();
            return Readiness::Ready(Batch::new(requests));
        }

        let wake_at = match (deadline, self.next_expiry()) {
            (Some(deadline), Some(expiry)) => Some(deadline.min(expiry)),
            (deadline, expiry) => deadline.or(expiry),
        };
        Readiness::Wait(wake_at)
    }
}

/// Buffers pending requests and decides when they form a dispatchable [`Batch`].
///
/// All queue state lives behind one mutex. Critical sections only move
/// requests in and out of the queue; resolving requests and waiting happen
/// outside the lock.
pub(crate) struct BatchAccumulator<I, O> {
    state: Mutex<BatcherState<I, O>>,
    wakeup: Notify,
    max_batch_size: usize,
    max_queue_delay: Duration,
}

impl<I, O> BatchAccumulator<I, O> {
    pub(crate) fn new(max_batch_size: usize, max_queue_delay: Duration) -> Self {
        Self {
            state: Mutex::new(BatcherState {
                queue: VecDeque::with_capacity(max_batch_size),
                closed: false,
            }),
            wakeup: Notify::new(),
            max_batch_size: max_batch_size.max(1),
            max_queue_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatcherState<I, O>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a request to the tail of the queue.
    ///
    /// Wakes the dispatch side when the request arms a new deadline or fills
    /// a batch. Hands the request back if the accumulator is closed.
    pub(crate) fn enqueue(&self, request: PendingRequest<I, O>) -> Result<(), PendingRequest<I, O>> {
        let wake = {
            let mut state = self.lock();
            if state.closed {
                return Err(request);
            }
            let has_deadline = request.expires_at().is_some();
            state.queue.push_back(request);
            let len = state.queue.len();
            len == 1 || len >= self.max_batch_size || has_deadline
        };
        if wake {
            self.wakeup.notify_one();
        }
        Ok(())
    }

    /// Waits for the next ready batch.
    ///
    /// Returns `None` once the accumulator is closed and its queue is empty.
    pub(crate) async fn next_batch(&self) -> Option<Batch<I, O>> {
        loop {
            let now = Instant::now();
            let (expired, readiness) = {
                let mut state = self.lock();
                let expired = state.take_expired(now);
                let readiness = state.take_ready(now, self.max_batch_size, self.max_queue_delay);
                (expired, readiness)
            };
            resolve_expired(expired);

            match readiness {
                Readiness::Ready(batch) => return Some(batch),
                Readiness::Closed => return None,
                Readiness::Wait(wake_at) => self.sleep(wake_at).await,
            }
        }
    }

    /// Drives `fut` to completion while resolving queued requests whose own
    /// deadlines pass in the meantime.
    ///
    /// Used while the dispatch loop waits for backend capacity, so per-request
    /// timeouts keep firing even when no batch can be formed.
    pub(crate) async fn expire_while<F: Future>(&self, fut: F) -> F::Output {
        tokio::pin!(fut);
        loop {
            let next_expiry = self.expire_overdue(Instant::now());
            tokio::select! {
                output = &mut fut => return output,
                _ = self.sleep(next_expiry) => {}
            }
        }
    }

    /// Stops accepting requests.
    ///
    /// With [`ShutdownMode::Drain`] queued requests stay and are handed out as
    /// batches immediately; with [`ShutdownMode::Immediate`] they are resolved
    /// with [`SchedulerError::ShuttingDown`].
    pub(crate) fn close(&self, mode: ShutdownMode) {
        let rejected: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            match mode {
                ShutdownMode::Drain => Vec::new(),
                ShutdownMode::Immediate => state.queue.drain(..).collect(),
            }
        };
        if !rejected.is_empty() {
            debug!(count = rejected.len(), "rejecting queued requests on shutdown");
        }
        for request in rejected {
            request.resolve(Err(SchedulerError::ShuttingDown));
        }
        self.wakeup.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }

    fn expire_overdue(&self, now: Instant) -> Option<Instant> {
        let (expired, next_expiry) = {
            let mut state = self.lock();
            let expired = state.take_expired(now);
            (expired, state.next_expiry())
        };
        resolve_expired(expired);
        next_expiry
    }

    fn remove(&self, id: Uuid) -> Option<PendingRequest<I, O>> {
        let mut state = self.lock();
        let position = state.queue.iter().position(|r| r.id() == id)?;
        state.queue.remove(position)
    }

    async fn sleep(&self, until: Option<Instant>) {
        match until {
            Some(at) => {
                tokio::select! {
                    _ = self.wakeup.notified() => {}
                    _ = sleep_until(at) => {}
                }
            }
            None => self.wakeup.notified().await,
        }
    }
}

impl<I: Send, O: Send> CancelQueued for BatchAccumulator<I, O> {
    fn cancel_queued(&self, id: Uuid) -> bool {
        match self.remove(id) {
            Some(request) => {
                debug!(request_id = %id, "cancelled queued request");
                request.resolve(Err(SchedulerError::Cancelled));
                true
            }
            None => false,
        }
    }

    fn expire_queued(&self, id: Uuid) -> bool {
        match self.remove(id) {
            Some(request) => {
                resolve_expired([request]);
                true
            }
            None => false,
        }
    }
}

fn resolve_expired<I, O>(expired: impl IntoIterator<Item = PendingRequest<I, O>>) {
    for request in expired {
        let waited = request.expires_at()
            .map(|at| at.saturating_duration_since(request.enqueued_at()))
            .unwrap_or_default();
        debug!(request_id = %request.id(), ?waited, "request timed out in queue");
        request.resolve(Err(SchedulerError::QueueTimeout(waited)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use tokio::sync::oneshot;
    use crate::communication::test_support::request;

    type Rx = oneshot::Receiver<Result<u32, SchedulerError>>;

    fn push(acc: &BatchAccumulator<u32, u32>, input: u32) -> (Uuid, Rx) {
        let (req, rx) = request(input, None);
        let id = req.id();
        assert!(acc.enqueue(req).is_ok());
        (id, rx)
    }

    fn inputs(batch: Batch<u32, u32>) -> Vec<u32> {
        batch.into_parts().0
    }

    fn assert_elapsed(start: Instant, millis: u64) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(millis) && elapsed < Duration::from_millis(millis + 5),
            "expected ~{millis}ms, got {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_is_ready_immediately() {
        let acc = BatchAccumulator::<u32, u32>::new(3, Duration::from_secs(3600));
        for i in 0..3 {
            push(&acc, i);
        }
        let batch = acc.next_batch().now_or_never().flatten().expect("full batch is ready");
        assert_eq!(inputs(batch), vec![0, 1, 2]);
        assert_eq!(acc.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_waits_for_delay() {
        let acc = BatchAccumulator::<u32, u32>::new(10, Duration::from_millis(50));
        let start = Instant::now();
        push(&acc, 7);

        assert!(acc.next_batch().now_or_never().is_none(), "partial batch must wait");

        let batch = acc.next_batch().await.unwrap();
        assert_elapsed(start, 50);
        assert_eq!(inputs(batch), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_follows_oldest_request() {
        let acc = BatchAccumulator::<u32, u32>::new(10, Duration::from_millis(50));
        let start = Instant::now();

        push(&acc, 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        push(&acc, 2);

        let first = acc.next_batch().await.unwrap();
        assert_elapsed(start, 50);
        assert_eq!(inputs(first), vec![1, 2]);

        // idle, then a new request starts a fresh window
        tokio::time::sleep(Duration::from_millis(10)).await;
        push(&acc, 3);
        let second = acc.next_batch().await.unwrap();
        assert_elapsed(start, 110);
        assert_eq!(inputs(second), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_splits_in_fifo_order() {
        let acc = BatchAccumulator::<u32, u32>::new(2, Duration::from_millis(20));
        for i in 0..5 {
            push(&acc, i);
        }
        assert_eq!(inputs(acc.next_batch().await.unwrap()), vec![0, 1]);
        assert_eq!(inputs(acc.next_batch().await.unwrap()), vec![2, 3]);
        assert_eq!(inputs(acc.next_batch().await.unwrap()), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_size_one_is_passthrough() {
        let acc = BatchAccumulator::<u32, u32>::new(1, Duration::from_secs(3600));
        push(&acc, 1);
        push(&acc, 2);
        assert_eq!(inputs(acc.next_batch().now_or_never().flatten().unwrap()), vec![1]);
        assert_eq!(inputs(acc.next_batch().now_or_never().flatten().unwrap()), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_wakes_waiting_consumer() {
        let acc = std::sync::Arc::new(BatchAccumulator::<u32, u32>::new(2, Duration::from_secs(3600)));
        let consumer = {
            let acc = acc.clone();
            tokio::spawn(async move { acc.next_batch().await.map(inputs) })
        };
        tokio::task::yield_now().await;
        push(&acc, 1);
        push(&acc, 2);
        assert_eq!(consumer.await.unwrap(), Some(vec![1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_close_flushes_then_ends() {
        let acc = BatchAccumulator::<u32, u32>::new(2, Duration::from_secs(3600));
        for i in 0..3 {
            push(&acc, i);
        }
        acc.close(ShutdownMode::Drain);
        assert!(acc.is_closed());

        assert_eq!(inputs(acc.next_batch().now_or_never().flatten().unwrap()), vec![0, 1]);
        assert_eq!(inputs(acc.next_batch().now_or_never().flatten().unwrap()), vec![2]);
        assert!(acc.next_batch().now_or_never().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_close_rejects_queue() {
        let acc = BatchAccumulator::<u32, u32>::new(4, Duration::from_secs(3600));
        let (_, rx1) = push(&acc, 1);
        let (_, rx2) = push(&acc, 2);

        acc.close(ShutdownMode::Immediate);

        assert_eq!(rx1.await.unwrap(), Err(SchedulerError::ShuttingDown));
        assert_eq!(rx2.await.unwrap(), Err(SchedulerError::ShuttingDown));
        assert!(acc.next_batch().now_or_never().unwrap().is_none());

        let (late, _rx) = request::<u32, u32>(3, None);
        assert!(acc.enqueue(late).is_err(), "closed accumulator hands requests back");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_removes_only_target() {
        let acc = BatchAccumulator::<u32, u32>::new(3, Duration::from_millis(10));
        push(&acc, 1);
        let (id, rx) = push(&acc, 2);
        push(&acc, 3);

        assert!(acc.cancel_queued(id));
        assert!(!acc.cancel_queued(id), "second cancel finds nothing");
        assert!(!acc.cancel_queued(Uuid::new_v4()));
        assert_eq!(rx.await.unwrap(), Err(SchedulerError::Cancelled));

        assert_eq!(inputs(acc.next_batch().await.unwrap()), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_request_never_batched() {
        let acc = BatchAccumulator::<u32, u32>::new(10, Duration::from_millis(50));
        let start = Instant::now();
        let (short, short_rx) = request::<u32, u32>(1, Some(start + Duration::from_millis(10)));
        acc.enqueue(short).ok();
        let (_, long_rx) = push(&acc, 2);

        let batch = acc.next_batch().await.unwrap();
        assert_eq!(inputs(batch), vec![2]);
        assert_eq!(short_rx.await.unwrap(), Err(SchedulerError::QueueTimeout(Duration::from_millis(10))));
        drop(long_rx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_while_fires_during_other_wait() {
        let acc = BatchAccumulator::<u32, u32>::new(10, Duration::from_secs(3600));
        let start = Instant::now();
        let (req, mut rx) = request::<u32, u32>(1, Some(start + Duration::from_millis(10)));
        acc.enqueue(req).ok();

        let value = acc.expire_while(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            "capacity"
        }).await;

        assert_eq!(value, "capacity");
        assert_eq!(rx.try_recv().unwrap(), Err(SchedulerError::QueueTimeout(Duration::from_millis(10))));
        assert_eq!(acc.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_queued_resolves_with_timeout() {
        let acc = BatchAccumulator::<u32, u32>::new(10, Duration::from_secs(3600));
        let start = Instant::now();
        let (req, rx) = request::<u32, u32>(1, Some(start + Duration::from_millis(15)));
        let id = req.id();
        acc.enqueue(req).ok();
        push(&acc, 2);

        assert!(acc.expire_queued(id));
        assert!(!acc.expire_queued(id), "already resolved");
        assert_eq!(rx.await.unwrap(), Err(SchedulerError::QueueTimeout(Duration::from_millis(15))));
        assert_eq!(acc.len(), 1);
    }
}
