use uuid::Uuid;
use crate::communication::{PendingRequest, ResultSink};

/// An ordered group of requests formed by the accumulator and consumed once by
/// the dispatch loop.
///
/// Request order is submission order, and it is the order in which inputs are
/// handed to the backend and outputs are routed back.
pub(crate) struct Batch<I, O> {
    id: Uuid,
    requests: Vec<PendingRequest<I, O>>,
}

impl<I, O> Batch<I, O> {
    pub(crate) fn new(requests: Vec<PendingRequest<I, O>>) -> Self {
        debug_assert!(!requests.is_empty(), "batches hold at least one request");
        Self {
            id: Uuid::new_v4(),
            requests,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    #[cfg(test)]
    pub(crate) fn request_ids(&self) -> Vec<Uuid> {
        self.requests.iter().map(PendingRequest::id).collect()
    }

    /// Splits the batch into the backend's input sequence and the matching sinks.
    pub(crate) fn into_parts(self) -> (Vec<I>, Vec<ResultSink<O>>) {
        self.requests.into_iter()
            .map(PendingRequest::into_parts)
            .unzip()
    }
}
