//! # Octomirror Queue Runtime
//!
//! Durable FIFO-ish queue for webhook deliveries.
//!
//! GitHub delivers webhooks at-least-once with a short delivery timeout, so
//! the receiver only verifies and enqueues; all processing happens here,
//! asynchronously, with per-item retry accounting:
//!
//! - items are claimed oldest-first under a short-lived lease so a crashed
//!   worker's work is reclaimable,
//! - retryable failures are returned to the queue with capped exponential
//!   backoff,
//! - items that exhaust their attempts are parked in `dead_letter` for
//!   operator inspection and explicit retry or discard,
//! - a cleanup pass deletes processed and dead-lettered items past their
//!   retention windows.
//!
//! The [`QueueStore`] trait abstracts persistence; [`MemoryQueueStore`] is
//! the reference implementation used in tests and single-process
//! deployments. [`QueueProcessor`] is the long-lived worker that drains the
//! queue through a [`QueueHandler`].

pub mod error;
pub mod health;
pub mod item;
pub mod memory;
pub mod processor;
pub mod store;

pub use error::QueueError;
pub use health::{HealthStatus, HealthThresholds, QueueHealth};
pub use item::{Lease, NewQueueItem, QueueItem, QueueItemId, QueueItemStatus};
pub use memory::MemoryQueueStore;
pub use processor::{
    backoff_delay, HandlerError, ProcessStats, ProcessorConfig, QueueHandler, QueueProcessor,
};
pub use store::{CleanupStats, EnqueueOutcome, QueueStore, StatusCounts};
