use async_trait::async_trait;
use crate::backend::{BatchBackend, BoxError, ItemBackend};
use crate::error::SchedulerError;

/// Outcome of one batch as seen by the dispatch loop: either a batch-level
/// error, or one outcome per item.
pub(crate) type BatchOutcome<O> = Result<Vec<Result<O, SchedulerError>>, SchedulerError>;

/// Uniform view over the backend flavours the scheduler can drive.
///
/// The dispatch loop only talks to a `BatchHandler`; the adapters below map
/// the public backend traits and their boxed errors onto it.
#[async_trait]
pub(crate) trait BatchHandler<I, O>: Send + Sync {
    async fn handle(&self, inputs: Vec<I>) -> BatchOutcome<O>;
}

/// Drives a [`BatchBackend`]: one error fails the whole batch.
pub(crate) struct WholeBatchHandler<B> {
    pub backend: B,
}

/// Drives an [`ItemBackend`]: item errors stay with their item.
pub(crate) struct PerItemHandler<B> {
    pub backend: B,
}

#[async_trait]
impl<B: BatchBackend> BatchHandler<B::Input, B::Output> for WholeBatchHandler<B> {
    async fn handle(&self, inputs: Vec<B::Input>) -> BatchOutcome<B::Output> {
        let outputs = self.backend.infer(inputs).await.map_err(backend_failure)?;
        Ok(outputs.into_iter().map(Ok).collect())
    }
}

#[async_trait]
impl<B: ItemBackend> BatchHandler<B::Input, B::Output> for PerItemHandler<B> {
    async fn handle(&self, inputs: Vec<B::Input>) -> BatchOutcome<B::Output> {
        let outcomes = self.backend.infer_items(inputs).await.map_err(backend_failure)?;
        Ok(outcomes.into_iter()
            .map(|outcome| outcome.map_err(backend_failure))
            .collect())
    }
}

fn backend_failure(err: BoxError) -> SchedulerError {
    SchedulerError::BackendFailure(err.to_string())
}
