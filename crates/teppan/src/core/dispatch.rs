use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use crate::communication::ResultSink;
use crate::error::SchedulerError;
use crate::stats::StatsRecorder;
use super::accumulator::BatchAccumulator;
use super::batch::Batch;
use super::handler::BatchHandler;

/// Everything the dispatch loop needs, shared with the scheduler facade.
pub(crate) struct DispatchContext<I, O> {
    pub accumulator: Arc<BatchAccumulator<I, O>>,
    pub handler: Arc<dyn BatchHandler<I, O>>,
    pub inflight: Arc<Semaphore>,
    pub inflight_limit: u32,
    pub backend_timeout: Option<Duration>,
    pub stats: Arc<StatsRecorder>,
}

/// Pulls ready batches from the accumulator and runs them against the backend.
///
/// A batch is only formed once an in-flight slot is free, so with a limit of
/// one the backend never sees more than one call at a time and requests keep
/// accumulating into the next batch while a call is outstanding. Each backend
/// call runs in its own task holding the slot; a panicking backend therefore
/// fails its own batch without taking the loop down.
///
/// The loop ends once the accumulator is closed and empty, after every
/// in-flight batch has resolved.
pub(crate) async fn dispatch_loop<I, O>(ctx: DispatchContext<I, O>)
where I: Send + 'static, O: Send + 'static
{
    loop {
        let slot = ctx.accumulator
            .expire_while(ctx.inflight.clone().acquire_owned())
            .await;
        let Ok(slot) = slot else {
            break;
        };

        let Some(batch) = ctx.accumulator.next_batch().await else {
            break;
        };

        let handler = ctx.handler.clone();
        let stats = ctx.stats.clone();
        let backend_timeout = ctx.backend_timeout;
        tokio::spawn(async move {
            dispatch_batch(handler.as_ref(), batch, backend_timeout, &stats).await;
            drop(slot);
        });
    }

    // every slot back means every in-flight batch has resolved
    if ctx.inflight.acquire_many(ctx.inflight_limit).await.is_err() {
        warn!("in-flight limiter closed while draining");
    }
    info!("dispatch loop stopped");
}

/// Runs one batch and routes each outcome back to the request at the same position.
pub(crate) async fn dispatch_batch<I, O>(
    handler: &dyn BatchHandler<I, O>,
    batch: Batch<I, O>,
    backend_timeout: Option<Duration>,
    stats: &StatsRecorder,
) {
    let batch_id = batch.id();
    let expected = batch.len();
    let (inputs, sinks) = batch.into_parts();
    stats.record_batch();
    debug!(%batch_id, size = expected, "dispatching batch");

    let outcome = match backend_timeout {
        Some(limit) => tokio::time::timeout(limit, handler.handle(inputs))
            .await
            .unwrap_or(Err(SchedulerError::BackendTimeout(limit))),
        None => handler.handle(inputs).await,
    };

    match outcome {
        Ok(results) if results.len() == expected => {
            for (sink, result) in sinks.into_iter().zip(results) {
                sink.resolve(result);
            }
        }
        Ok(results) => {
            let actual = results.len();
            error!(
                %batch_id, expected, actual,
                "backend broke the batch contract: output count does not match input count"
            );
            fail_all(sinks, SchedulerError::BackendContractViolation { expected, actual });
        }
        Err(err) => {
            warn!(%batch_id, size = expected, error = %err, "batch failed");
            fail_all(sinks, err);
        }
    }
}

fn fail_all<O>(sinks: Vec<ResultSink<O>>, err: SchedulerError) {
    for sink in sinks {
        sink.resolve(Err(err.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;
    use crate::backend::{from_fn, BoxError};
    use crate::communication::test_support::request;
    use crate::core::handler::WholeBatchHandler;

    type Rx = oneshot::Receiver<Result<u32, SchedulerError>>;

    fn batch_of(inputs: &[u32]) -> (Batch<u32, u32>, Vec<Rx>) {
        let (requests, receivers): (Vec<_>, Vec<_>) = inputs.iter()
            .map(|&input| request::<u32, u32>(input, None))
            .unzip();
        (Batch::new(requests), receivers)
    }

    async fn collect(receivers: Vec<Rx>) -> Vec<Result<u32, SchedulerError>> {
        let mut results = Vec::new();
        for rx in receivers {
            results.push(rx.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_outputs_routed_by_position() {
        let handler = WholeBatchHandler {
            backend: from_fn(|inputs: Vec<u32>| async move {
                Ok::<_, BoxError>(inputs.into_iter().map(|x| x * 100).collect::<Vec<u32>>())
            }),
        };
        let stats = StatsRecorder::default();
        let (batch, receivers) = batch_of(&[3, 1, 2]);

        dispatch_batch::<u32, u32>(&handler, batch, None, &stats).await;

        assert_eq!(collect(receivers).await, vec![Ok(300), Ok(100), Ok(200)]);
        assert_eq!(stats.snapshot().batches_dispatched, 1);
    }

    #[tokio::test]
    async fn test_short_output_is_contract_violation() {
        let handler = WholeBatchHandler {
            backend: from_fn(|inputs: Vec<u32>| async move {
                Ok::<_, BoxError>(inputs.into_iter().skip(1).collect::<Vec<u32>>())
            }),
        };
        let (batch, receivers) = batch_of(&[1, 2, 3]);

        dispatch_batch::<u32, u32>(&handler, batch, None, &StatsRecorder::default()).await;

        let violation = SchedulerError::BackendContractViolation { expected: 3, actual: 2 };
        assert_eq!(collect(receivers).await, vec![Err(violation.clone()), Err(violation.clone()), Err(violation)]);
    }

    #[tokio::test]
    async fn test_backend_error_fails_every_member() {
        let handler = WholeBatchHandler {
            backend: from_fn(|_inputs: Vec<u32>| async move {
                Err::<Vec<u32>, BoxError>("connection reset".into())
            }),
        };
        let (batch, receivers) = batch_of(&[1, 2, 3]);

        dispatch_batch::<u32, u32>(&handler, batch, None, &StatsRecorder::default()).await;

        let failure = SchedulerError::BackendFailure("connection reset".to_string());
        for result in collect(receivers).await {
            assert_eq!(result, Err(failure.clone()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out_whole_batch() {
        let handler = WholeBatchHandler {
            backend: from_fn(|inputs: Vec<u32>| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BoxError>(inputs)
            }),
        };
        let stats = StatsRecorder::default();
        let (batch, receivers) = batch_of(&[1, 2]);

        dispatch_batch::<u32, u32>(&handler, batch, Some(Duration::from_millis(30)), &stats).await;

        let timeout = SchedulerError::BackendTimeout(Duration::from_millis(30));
        assert_eq!(collect(receivers).await, vec![Err(timeout.clone()), Err(timeout)]);
        assert_eq!(stats.snapshot().batches_dispatched, 1);
    }
}
