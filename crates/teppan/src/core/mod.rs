//! # Core Scheduling Machinery
//!
//! * [`accumulator`] - Buffers submitted requests and decides when they form a
//!   batch: either `max_batch_size` requests are queued, or the oldest one has
//!   waited `max_queue_delay`. Also owns per-request queue deadlines and
//!   cancellation of requests that have not been batched yet.
//!
//! * [`batch`] - The ordered, immutable group of requests handed to the backend.
//!
//! * [`handler`] - The `BatchHandler` seam between the dispatch loop and the
//!   public backend traits.
//!
//! * [`dispatch`] - The loop that forms batches as in-flight capacity frees up,
//!   calls the backend and routes every outcome back to its caller.
//!
//! * [`worker`] - Background task management for the dispatch loop.
//!
pub(crate) mod accumulator;
pub(crate) mod batch;
pub(crate) mod dispatch;
pub(crate) mod handler;
pub(crate) mod worker;
