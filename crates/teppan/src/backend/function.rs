use std::future::Future;
use std::marker::PhantomData;
use async_trait::async_trait;
use super::{BatchBackend, BoxError, ItemBackend};

/// A [`BatchBackend`] backed by an async closure. See [`from_fn`].
pub struct FnBackend<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

/// An [`ItemBackend`] backed by an async closure. See [`from_item_fn`].
pub struct ItemFnBackend<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

/// Wraps an async closure as a [`BatchBackend`].
///
/// ```
/// use teppan::backend::{from_fn, BoxError};
///
/// let doubler = from_fn(|inputs: Vec<u32>| async move {
///     Ok::<_, BoxError>(inputs.into_iter().map(|x| x * 2).collect())
/// });
/// # let _ = doubler;
/// ```
pub fn from_fn<F, Fut, I, O>(f: F) -> FnBackend<F, I, O>
where
    F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<O>, BoxError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    FnBackend { f, _marker: PhantomData }
}

/// Wraps an async closure returning per-item outcomes as an [`ItemBackend`].
pub fn from_item_fn<F, Fut, I, O>(f: F) -> ItemFnBackend<F, I, O>
where
    F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Result<O, BoxError>>, BoxError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    ItemFnBackend { f, _marker: PhantomData }
}

#[async_trait]
impl<F, Fut, I, O> BatchBackend for FnBackend<F, I, O>
where
    F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<O>, BoxError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn infer(&self, inputs: Vec<I>) -> Result<Vec<O>, BoxError> {
        (self.f)(inputs).await
    }
}

#[async_trait]
impl<F, Fut, I, O> ItemBackend for ItemFnBackend<F, I, O>
where
    F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Result<O, BoxError>>, BoxError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn infer_items(&self, inputs: Vec<I>) -> Result<Vec<Result<O, BoxError>>, BoxError> {
        (self.f)(inputs).await
    }
}
