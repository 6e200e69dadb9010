//! # Compute Backends
//!
//! This module defines the contract between the scheduler and the compute
//! backend it batches for.
//!
//! - [`BatchBackend`] - whole-batch inference: one output per input, or one
//!   error for the whole batch
//! - [`ItemBackend`] - inference that reports an outcome per item
//! - [`from_fn`] / [`from_item_fn`] - wrap an async closure as a backend, for
//!   local computations and test stubs
//!
//! ## Feature Flags
//!
//! - `candle`: Enables [`candle::CandleBackend`], which stacks per-request
//!   tensors along the batch dimension and splits the model output back.

mod core_trait;
mod function;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor backend implementation.
///
/// This module is only available when the `candle` feature flag is enabled.
pub mod candle;

pub use core_trait::*;
pub use function::{from_fn, from_item_fn, FnBackend, ItemFnBackend};
