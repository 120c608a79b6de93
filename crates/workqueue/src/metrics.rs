//! Prometheus metrics for work queues
//!
//! All series are labelled with the queue name.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

/// Queue metrics registered on a shared [`Registry`].
#[derive(Clone, Debug)]
pub struct QueueMetrics {
    adds: IntCounterVec,
    depth: IntGaugeVec,
    retries: IntCounterVec,
    dropped: IntCounterVec,
}

impl QueueMetrics {
    /// Creates the metric families and registers them on `registry`.
    ///
    /// Fails if a family with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let adds = IntCounterVec::new(
            Opts::new("workqueue_adds_total", "Total number of keys added to the queue"),
            &["name"],
        )?;
        let depth = IntGaugeVec::new(
            Opts::new("workqueue_depth", "Current number of keys waiting in the queue"),
            &["name"],
        )?;
        let retries = IntCounterVec::new(
            Opts::new("workqueue_retries_total", "Total number of rate-limited re-adds"),
            &["name"],
        )?;
        let dropped = IntCounterVec::new(
            Opts::new(
                "workqueue_dropped_total",
                "Total number of keys given up on after exhausting their retries",
            ),
            &["name"],
        )?;

        registry.register(Box::new(adds.clone()))?;
        registry.register(Box::new(depth.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(dropped.clone()))?;

        Ok(Self {
            adds,
            depth,
            retries,
            dropped,
        })
    }

    /// Exposes zeroed series for a new queue.
    pub(crate) fn register_queue(&self, queue: &str) {
        self.adds.with_label_values(&[queue]);
        self.depth.with_label_values(&[queue]).set(0);
        self.retries.with_label_values(&[queue]);
        self.dropped.with_label_values(&[queue]);
    }

    /// Drops every series of a retired queue. Missing series are ignored.
    pub(crate) fn remove_queue(&self, queue: &str) {
        let _ = self.adds.remove_label_values(&[queue]);
        let _ = self.depth.remove_label_values(&[queue]);
        let _ = self.retries.remove_label_values(&[queue]);
        let _ = self.dropped.remove_label_values(&[queue]);
    }

    pub(crate) fn add(&self, queue: &str) {
        self.adds.with_label_values(&[queue]).inc();
        self.depth.with_label_values(&[queue]).inc();
    }

    pub(crate) fn taken(&self, queue: &str) {
        self.depth.with_label_values(&[queue]).dec();
    }

    pub(crate) fn retry(&self, queue: &str) {
        self.retries.with_label_values(&[queue]).inc();
    }

    pub(crate) fn dropped(&self, queue: &str) {
        self.dropped.with_label_values(&[queue]).inc();
    }

    /// Current depth of the named queue.
    #[must_use]
    pub fn depth(&self, queue: &str) -> i64 {
        self.depth.with_label_values(&[queue]).get()
    }

    /// Total adds seen by the named queue.
    #[must_use]
    pub fn adds(&self, queue: &str) -> u64 {
        self.adds.with_label_values(&[queue]).get()
    }

    /// Total rate-limited re-adds seen by the named queue.
    #[must_use]
    pub fn retries(&self, queue: &str) -> u64 {
        self.retries.with_label_values(&[queue]).get()
    }

    /// Total keys the named queue gave up on.
    #[must_use]
    pub fn dropped_total(&self, queue: &str) -> u64 {
        self.dropped.with_label_values(&[queue]).get()
    }
}
