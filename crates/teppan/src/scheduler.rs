use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use futures::future::join_all;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info};
use crate::backend::{BatchBackend, ItemBackend};
use crate::communication::{CancelQueued, PendingRequest, PendingResult, ResultSink};
use crate::config::SchedulerConfig;
use crate::core::accumulator::BatchAccumulator;
use crate::core::dispatch::{dispatch_loop, DispatchContext};
use crate::core::handler::{BatchHandler, PerItemHandler, WholeBatchHandler};
use crate::core::worker::DispatchWorker;
use crate::error::{ConfigError, SchedulerError};
use crate::stats::{SchedulerStats, StatsRecorder};

/// How [`Scheduler::shutdown`] treats work that has not resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Dispatch everything still queued and wait until every request,
    /// queued or in flight, has resolved.
    Drain,
    /// Resolve every queued request with [`SchedulerError::ShuttingDown`] and
    /// return without waiting for an in-flight backend call. That call still
    /// completes in the background and its requests resolve normally.
    Immediate,
}

impl From<bool> for ShutdownMode {
    /// `true` drains, `false` shuts down immediately.
    fn from(drain: bool) -> Self {
        if drain { ShutdownMode::Drain } else { ShutdownMode::Immediate }
    }
}

enum Lifecycle {
    /// Holds the signal the dispatch loop raises once it has finished.
    Idle(watch::Sender<bool>),
    Running(DispatchWorker),
    Stopped,
}

/// # Scheduler
///
/// Collects independent inference requests into batches and runs them against
/// a single backend.
///
/// Callers [`submit`](Self::submit) one input at a time and get back a
/// [`PendingResult`] for that input alone. Behind the scenes requests are
/// grouped in arrival order: a batch is dispatched as soon as
/// `max_batch_size` requests are queued, or once the oldest queued request has
/// waited `max_queue_delay`, whichever comes first. While a batch is running,
/// new submissions keep queueing for the next one.
///
/// ## Type Parameters
///
/// * `I` - Input of a single request
/// * `O` - Output of a single request
///
/// ## Example
///
/// ```
/// use teppan::{Scheduler, SchedulerConfig, ShutdownMode};
/// use teppan::backend::{from_fn, BoxError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = from_fn(|words: Vec<String>| async move {
///     Ok::<_, BoxError>(words.into_iter().map(|w| w.len()).collect::<Vec<usize>>())
/// });
/// let scheduler = Scheduler::spawn(backend, SchedulerConfig::default())?;
///
/// let lengths = scheduler.infer_many(["tokio".to_string(), "uuid".to_string()]).await;
/// assert_eq!(lengths, vec![Ok(5), Ok(4)]);
///
/// scheduler.shutdown(ShutdownMode::Drain).await;
/// # Ok(())
/// # }
/// ```
pub struct Scheduler<I, O> {
    accumulator: Arc<BatchAccumulator<I, O>>,
    handler: Arc<dyn BatchHandler<I, O>>,
    inflight: Arc<Semaphore>,
    inflight_limit: u32,
    stats: Arc<StatsRecorder>,
    config: SchedulerConfig,
    lifecycle: Mutex<Lifecycle>,
    stopped: watch::Receiver<bool>,
}

impl<I, O> Scheduler<I, O>
where I: Send + 'static, O: Send + 'static
{
    /// Creates a scheduler for a whole-batch backend without starting it.
    ///
    /// Requests can be submitted right away; nothing is dispatched until
    /// [`start`](Self::start) is called.
    pub fn new<B>(backend: B, config: SchedulerConfig) -> Result<Self, ConfigError>
    where B: BatchBackend<Input = I, Output = O>
    {
        Self::with_handler(Arc::new(WholeBatchHandler { backend }), config)
    }

    /// Creates a scheduler for a backend that reports an outcome per item.
    pub fn with_item_backend<B>(backend: B, config: SchedulerConfig) -> Result<Self, ConfigError>
    where B: ItemBackend<Input = I, Output = O>
    {
        Self::with_handler(Arc::new(PerItemHandler { backend }), config)
    }

    /// Creates a scheduler and starts its dispatch loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn<B>(backend: B, config: SchedulerConfig) -> Result<Self, ConfigError>
    where B: BatchBackend<Input = I, Output = O>
    {
        let scheduler = Self::new(backend, config)?;
        scheduler.start();
        Ok(scheduler)
    }

    /// Like [`spawn`](Self::spawn), for a backend that reports an outcome per item.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn_item_backend<B>(backend: B, config: SchedulerConfig) -> Result<Self, ConfigError>
    where B: ItemBackend<Input = I, Output = O>
    {
        let scheduler = Self::with_item_backend(backend, config)?;
        scheduler.start();
        Ok(scheduler)
    }

    fn with_handler(handler: Arc<dyn BatchHandler<I, O>>, config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let inflight_limit = u32::try_from(config.max_inflight_batches)
            .unwrap_or(u32::MAX);
        let (stopped_tx, stopped) = watch::channel(false);

        Ok(Self {
            accumulator: Arc::new(BatchAccumulator::new(config.max_batch_size, config.max_queue_delay())),
            handler,
            inflight: Arc::new(Semaphore::new(inflight_limit as usize)),
            inflight_limit,
            stats: Arc::new(StatsRecorder::default()),
            config,
            lifecycle: Mutex::new(Lifecycle::Idle(stopped_tx)),
            stopped,
        })
    }

    fn dispatch_context(&self) -> DispatchContext<I, O> {
        DispatchContext {
            accumulator: self.accumulator.clone(),
            handler: self.handler.clone(),
            inflight: self.inflight.clone(),
            inflight_limit: self.inflight_limit,
            backend_timeout: self.config.backend_timeout(),
            stats: self.stats.clone(),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the dispatch loop on the current Tokio runtime.
    ///
    /// Returns `false` if the scheduler is already running or has been shut down.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        let stopped = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle(stopped) => stopped,
            other => {
                *lifecycle = other;
                return false;
            }
        };
        *lifecycle = Lifecycle::Running(DispatchWorker::spawn(run_until_stopped(self.dispatch_context(), stopped)));
        info!(
            max_batch_size = self.config.max_batch_size,
            max_queue_delay = ?self.config.max_queue_delay(),
            max_inflight_batches = self.inflight_limit,
            "scheduler started"
        );
        true
    }

    /// Submits one input, using the configured per-request timeout.
    ///
    /// Never waits on the backend; the returned handle resolves once the
    /// request's batch has run. After shutdown the handle resolves with
    /// [`SchedulerError::ShuttingDown`].
    pub fn submit(&self, input: I) -> PendingResult<O> {
        self.submit_with_timeout(input, self.config.per_request_timeout())
    }

    /// Submits one input with its own queue deadline.
    ///
    /// If the request has not been placed in a batch within `timeout` it
    /// resolves with [`SchedulerError::QueueTimeout`]. `None` lets it wait
    /// for as long as it takes.
    pub fn submit_with_timeout(&self, input: I, timeout: Option<Duration>) -> PendingResult<O> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let expires_at = timeout.and_then(|limit| now.checked_add(limit));
        let request = PendingRequest::new(input, now, expires_at, ResultSink::new(tx, self.stats.clone()));
        let id = request.id();
        self.stats.record_submitted();

        if let Err(rejected) = self.accumulator.enqueue(request) {
            debug!(request_id = %id, "rejecting submission after shutdown");
            rejected.resolve(Err(SchedulerError::ShuttingDown));
        }

        let queue = Arc::downgrade(&self.accumulator) as Weak<dyn CancelQueued>;
        PendingResult::new(id, rx, queue, expires_at)
    }

    /// Submits one input and waits for its output.
    pub async fn infer(&self, input: I) -> Result<O, SchedulerError> {
        self.submit(input).await
    }

    /// Submits every input before waiting on any, so they can share batches.
    ///
    /// Outcomes are returned in input order.
    pub async fn infer_many<It>(&self, inputs: It) -> Vec<Result<O, SchedulerError>>
    where It: IntoIterator<Item = I>
    {
        let pending: Vec<_> = inputs.into_iter()
            .map(|input| self.submit(input))
            .collect();
        join_all(pending).await
    }

    /// Stops accepting work and shuts the dispatch loop down.
    ///
    /// With [`ShutdownMode::Drain`] this returns once every queued and
    /// in-flight request has resolved; a scheduler that was never started
    /// drains on the caller's task. With [`ShutdownMode::Immediate`] queued
    /// requests resolve with [`SchedulerError::ShuttingDown`] and this returns
    /// without waiting on the backend.
    ///
    /// Every `Drain` call waits for the same completion, including calls made
    /// concurrently with, or after, another shutdown.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        info!(?mode, queued = self.accumulator.len(), "scheduler shutting down");
        self.accumulator.close(mode);

        let previous = {
            let mut lifecycle = self.lifecycle();
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        match (previous, mode) {
            (Lifecycle::Running(worker), ShutdownMode::Drain) => worker.join().await,
            (Lifecycle::Running(worker), ShutdownMode::Immediate) => worker.detach(),
            (Lifecycle::Idle(stopped), ShutdownMode::Drain) => {
                run_until_stopped(self.dispatch_context(), stopped).await
            }
            // never started and nothing left queued; dropping the signal releases waiters
            (Lifecycle::Idle(_), ShutdownMode::Immediate) | (Lifecycle::Stopped, _) => {}
        }

        if mode == ShutdownMode::Drain {
            self.wait_stopped().await;
        }
    }

    async fn wait_stopped(&self) {
        let mut stopped = self.stopped.clone();
        if stopped.wait_for(|done| *done).await.is_err() {
            debug!("dispatch loop ended without a stop signal");
        }
    }

    /// Counters accumulated since the scheduler was created.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }

    /// Number of requests waiting to be batched.
    pub fn queue_len(&self) -> usize {
        self.accumulator.len()
    }

    /// The configuration the scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether the dispatch loop has been started and not yet shut down.
    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_))
    }
}

async fn run_until_stopped<I, O>(ctx: DispatchContext<I, O>, stopped: watch::Sender<bool>)
where I: Send + 'static, O: Send + 'static
{
    dispatch_loop(ctx).await;
    // a panicking loop drops the sender instead, which also releases waiters
    stopped.send_replace(true);
}

impl<I, O> Drop for Scheduler<I, O> {
    fn drop(&mut self) {
        if !self.accumulator.is_closed() {
            debug!("scheduler dropped without shutdown; rejecting queued requests");
            self.accumulator.close(ShutdownMode::Immediate);
        }
    }
}

impl<I, O> std::fmt::Debug for Scheduler<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("queued", &self.accumulator.len())
            .finish()
    }
}
