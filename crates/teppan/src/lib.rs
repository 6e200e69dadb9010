//! # Teppan
//!
//! An asynchronous micro-batching scheduler that collects independent
//! inference requests into batches before handing them to a compute backend.
//!
//! ## Overview
//!
//! Accelerators process a batch of N inputs in roughly the time of one, but
//! requests arrive one at a time from unrelated callers. Teppan sits between
//! the two: each caller submits a single input and awaits a single output,
//! while the scheduler groups requests in arrival order and calls the backend
//! once per group.
//!
//! A batch is dispatched when either
//!
//! - `max_batch_size` requests are waiting, or
//! - the oldest waiting request has been queued for `max_queue_delay`.
//!
//! Each output is routed back to the caller whose input sits at the same
//! position in the batch, and every request resolves exactly once: with its
//! output, or with a [`SchedulerError`] explaining why it did not get one.
//!
//! ## Architecture
//!
//! ### Backends
//!
//! The [`backend::BatchBackend`] trait is the only thing a model integration
//! implements: a list of inputs in, a list of outputs of the same length and
//! order out. [`backend::ItemBackend`] is the variant for backends that can
//! fail individual items without failing the batch.
//!
//! ### Scheduling
//!
//! The [`Scheduler`] owns a queue of pending requests and a background
//! dispatch loop. The loop forms a batch only once the backend has capacity
//! (one in-flight batch by default), so requests that arrive during a backend
//! call accumulate into the next batch instead of waiting behind it.
//!
//! ### Results
//!
//! [`Scheduler::submit`] never waits on the backend. It returns a
//! [`PendingResult`], a future for that one request which can also cancel it
//! while it is still queued.
//!
//! ## Features
//!
//! - **candle** - Enables the candle tensor backend adapter
//!
//! ## Logging
//!
//! Teppan emits [`tracing`](https://docs.rs/tracing) events and never installs
//! a subscriber itself.
//!

mod communication;
mod core;
mod error;
mod scheduler;
mod stats;

pub mod backend;
pub mod config;

pub use communication::PendingResult;
pub use config::SchedulerConfig;
pub use error::{ConfigError, SchedulerError};
pub use scheduler::{Scheduler, ShutdownMode};
pub use stats::SchedulerStats;
