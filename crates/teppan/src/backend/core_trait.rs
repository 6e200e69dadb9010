use std::sync::Arc;
use async_trait::async_trait;

/// Error type returned by backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A compute backend that processes a whole batch in one call.
///
/// The scheduler hands `infer` the inputs of one batch in submission order.
/// Implementations must return exactly one output per input, in the same
/// order. Returning a different number of outputs is treated as a contract
/// violation and fails every request in the batch; returning an error fails
/// every request in the batch with the same error.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use teppan::backend::{BatchBackend, BoxError};
///
/// struct Lengths;
///
/// #[async_trait]
/// impl BatchBackend for Lengths {
///     type Input = String;
///     type Output = usize;
///
///     async fn infer(&self, inputs: Vec<String>) -> Result<Vec<usize>, BoxError> {
///         Ok(inputs.iter().map(|s| s.len()).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait BatchBackend: Send + Sync + 'static {
    /// A single caller's payload.
    type Input: Send + 'static;

    /// The result produced for one input.
    type Output: Send + 'static;

    /// Runs one batch.
    async fn infer(&self, inputs: Vec<Self::Input>) -> Result<Vec<Self::Output>, BoxError>;
}

/// A compute backend that reports an outcome per item.
///
/// Like [`BatchBackend`], but individual items may fail without failing the
/// rest of the batch. An outer `Err` still fails the whole batch, and the
/// number of item outcomes must match the number of inputs.
#[async_trait]
pub trait ItemBackend: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    async fn infer_items(
        &self,
        inputs: Vec<Self::Input>,
    ) -> Result<Vec<Result<Self::Output, BoxError>>, BoxError>;
}

#[async_trait]
impl<B: BatchBackend> BatchBackend for Arc<B> {
    type Input = B::Input;
    type Output = B::Output;

    async fn infer(&self, inputs: Vec<Self::Input>) -> Result<Vec<Self::Output>, BoxError> {
        self.as_ref().infer(inputs).await
    }
}

#[async_trait]
impl<B: ItemBackend> ItemBackend for Arc<B> {
    type Input = B::Input;
    type Output = B::Output;

    async fn infer_items(
        &self,
        inputs: Vec<Self::Input>,
    ) -> Result<Vec<Result<Self::Output, BoxError>>, BoxError> {
        self.as_ref().infer_items(inputs).await
    }
}
