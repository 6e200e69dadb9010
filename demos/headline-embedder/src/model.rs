use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use teppan::backend::candle::TensorModel;

pub const VOCAB: usize = 256;
pub const EMBEDDING_DIM: usize = 16;

/// Projects hashed bag-of-words vectors onto a fixed random basis and
/// L2-normalizes the result.
pub struct Embedder {
    projection: Tensor,
}

impl Embedder {
    pub fn new(device: &Device) -> candle_core::Result<Self> {
        let projection = Tensor::randn(0f32, 1.0, (VOCAB, EMBEDDING_DIM), device)?;
        Ok(Self { projection })
    }
}

/// Hashes every lowercase word of `text` into one of `VOCAB` buckets.
pub fn tokenize(text: &str, device: &Device) -> candle_core::Result<Tensor> {
    let mut counts = vec![0f32; VOCAB];
    for word in text.split_whitespace() {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        counts[(hasher.finish() % VOCAB as u64) as usize] += 1.0;
    }
    Tensor::from_vec(counts, VOCAB, device)
}

#[async_trait]
impl TensorModel for Embedder {
    async fn forward(&self, batch: Tensor) -> candle_core::Result<Tensor> {
        let projected = batch.matmul(&self.projection)?;
        let norms = projected.sqr()?.sum_keepdim(1)?.sqrt()?;
        projected.broadcast_div(&norms)
    }
}
