use async_trait::async_trait;
use candle_core::Tensor;
use super::{BatchBackend, BoxError};

/// A model that runs a forward pass over a batched tensor.
///
/// The 0th dimension of both the input and the output is the batch dimension.
#[async_trait]
pub trait TensorModel: Send + Sync + 'static {
    async fn forward(&self, batch: Tensor) -> candle_core::Result<Tensor>;
}

/// Adapts a [`TensorModel`] to the [`BatchBackend`] contract.
///
/// Per-request tensors are stacked along a new 0th dimension, so every request
/// in a batch must share a shape. The model output is split back along the 0th
/// dimension, one row per request.
pub struct CandleBackend<M> {
    model: M,
}

impl<M> CandleBackend<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

#[async_trait]
impl<M: TensorModel> BatchBackend for CandleBackend<M> {
    type Input = Tensor;
    type Output = Tensor;

    async fn infer(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, BoxError> {
        let batch = Tensor::stack(inputs.as_slice(), 0)?;
        let output = self.model.forward(batch).await?;
        let rows = output.dim(0)?;
        let split = (0..rows)
            .map(|idx| output.get(idx))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(split)
    }
}
