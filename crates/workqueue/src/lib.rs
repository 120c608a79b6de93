//! Work Queue
//!
//! A deduplicating, delayable, rate-limited queue of opaque keys used by the
//! PgOps controllers to decouple watch notifications from reconciliation.
//!
//! # Example
//!
//! ```no_run
//! use workqueue::{WorkQueue, default_controller_rate_limiter};
//!
//! # async fn example() {
//! let queue = WorkQueue::new("pgcluster", default_controller_rate_limiter());
//! queue.add("default/hippo".to_string());
//! queue.add("default/hippo".to_string()); // collapses into the pending entry
//!
//! while let Some(key) = queue.get().await {
//!     // reconcile `key` ...
//!     queue.forget(&key);
//!     queue.done(&key);
//! }
//! # }
//! ```
//!
//! # Semantics
//!
//! - **Deduplication**: a key added while it is already pending is not queued twice
//! - **At most one in flight**: a key re-added while being processed is held back
//!   until `done` is called for it
//! - **Retries**: `add_rate_limited` re-queues a key after a delay chosen by a
//!   [`RateLimiter`]; `forget` resets the key's failure history
//! - **Shutdown**: after `shut_down` new keys are refused, queued keys are still
//!   handed out, and `get` returns `None` once the queue is drained

pub mod metrics;
pub mod queue;
pub mod rate_limiter;

pub use metrics::QueueMetrics;
pub use queue::WorkQueue;
pub use rate_limiter::{
    BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
    default_controller_rate_limiter,
};
