//! Module for handling the background dispatch task.

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::error;

/// A handle for the background task running the dispatch loop.
///
/// The task stops by itself once the accumulator it reads from is closed and
/// empty; the handle only decides whether the owner waits for that to happen.
///
/// # Example
///
/// ```ignore
/// let worker = DispatchWorker::spawn(async move {
///     dispatch_loop(ctx).await;
/// });
///
/// accumulator.close(ShutdownMode::Drain);
/// worker.join().await;
/// ```
pub(crate) struct DispatchWorker {
    /// Handle to the spawned task, becomes `None` once joined or detached
    handle: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    /// Spawns `task` on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub(crate) fn spawn<F>(task: F) -> Self
    where F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(task)),
        }
    }

    /// Waits for the task to finish.
    pub(crate) async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!("dispatch loop panicked");
                }
            }
        }
    }

    /// Lets the task run to completion in the background.
    pub(crate) fn detach(mut self) {
        self.handle.take();
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}
