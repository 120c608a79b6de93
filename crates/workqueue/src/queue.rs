//! # Work queue
//!
//! FIFO of keys with three sets of bookkeeping:
//! - `queue`: keys waiting to be handed out, in order
//! - `dirty`: keys that need processing (queued, or re-added while processing)
//! - `processing`: keys currently held by a worker
//!
//! A key is in `queue` only if it is in `dirty` and not in `processing`, so
//! a key is never queued twice and never handed to two workers at once.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::metrics::QueueMetrics;
use crate::rate_limiter::RateLimiter;

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
    shutdown: CancellationToken,
    rate_limiter: Box<dyn RateLimiter<K>>,
    metrics: Option<QueueMetrics>,
}

/// Deduplicating, delayable, rate-limited queue of keys.
///
/// Cloning is cheap; clones share the same queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .field("shutting_down", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates an empty queue without metrics.
    pub fn new(name: impl Into<String>, rate_limiter: impl RateLimiter<K> + 'static) -> Self {
        Self::with_metrics(name, rate_limiter, None)
    }

    /// Creates an empty queue reporting to `metrics` under its name.
    pub fn with_metrics(
        name: impl Into<String>,
        rate_limiter: impl RateLimiter<K> + 'static,
        metrics: Option<QueueMetrics>,
    ) -> Self {
        let name = name.into();
        if let Some(metrics) = &metrics {
            metrics.register_queue(&name);
        }
        Self {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
                rate_limiter: Box::new(rate_limiter),
                metrics,
            }),
        }
    }

    /// Queue name, used as the metrics label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, state: &mut State<K>, key: K) {
        state.queue.push_back(key);
        if let Some(metrics) = &self.inner.metrics {
            metrics.add(&self.inner.name);
        }
        self.inner.notify.notify_one();
    }

    /// Marks `key` as needing processing.
    ///
    /// Ignored after shutdown. A key that is already pending is not queued
    /// again; a key that is being processed is queued once `done` is called.
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down {
            trace!(queue = %self.inner.name, "Ignoring add after shutdown");
            return;
        }
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        self.push(&mut state, key);
    }

    /// Number of keys waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for the next key and marks it as processing.
    ///
    /// Returns `None` only once the queue is shut down and drained. Every
    /// key returned must be passed to [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if let Some(metrics) = &self.inner.metrics {
                        metrics.taken(&self.inner.name);
                    }
                    if !state.queue.is_empty() {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks `key` as no longer processing, re-queueing it if it was added
    /// in the meantime.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            self.push(&mut state, key.clone());
        }
    }

    /// Refuses further adds and wakes every waiting `get`.
    ///
    /// Keys already queued are still handed out.
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
        trace!(queue = %self.inner.name, "Queue shut down");
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Adds `key` once `delay` has elapsed.
    ///
    /// Pending delayed adds are discarded when the queue shuts down. Must be
    /// called from within a Tokio runtime.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue: Weak<Inner<K>> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = queue.upgrade() {
                        WorkQueue { inner }.add(key);
                    }
                }
            }
        });
    }

    /// Re-adds `key` after the delay chosen by the rate limiter.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.inner.rate_limiter.when(&key);
        if let Some(metrics) = &self.inner.metrics {
            metrics.retry(&self.inner.name);
        }
        trace!(queue = %self.inner.name, delay_ms = delay.as_millis(), "Rate-limited re-add");
        self.add_after(key, delay);
    }

    /// Clears the retry history of `key`.
    pub fn forget(&self, key: &K) {
        self.inner.rate_limiter.forget(key);
    }

    /// Number of rate-limited re-adds of `key` since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Removes the queue's metric series once it is no longer used.
    pub fn remove_metrics(&self) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.remove_queue(&self.inner.name);
        }
    }

    /// Records that a key was given up on after exhausting its retries.
    pub fn record_dropped(&self) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.dropped(&self.inner.name);
        }
    }
}
