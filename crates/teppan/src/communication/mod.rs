mod handle;
mod pending;

pub use handle::PendingResult;
pub(crate) use handle::CancelQueued;
pub(crate) use pending::{PendingRequest, ResultSink};

#[cfg(test)]
pub(crate) use pending::test_support;
