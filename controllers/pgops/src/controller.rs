//! Generic resource controller pattern.
//!
//! Two shapes of controller are used by a group:
//! - [`QueuedController`]: notifications enqueue an [`ObjectKey`]; worker loops
//!   pull keys, look the object up in the informer cache and call a
//!   [`Reconciler`], retrying transient failures with backoff
//! - [`HandlerController`]: notifications are handled inline by a
//!   [`ResourceEventHandler`], without a queue or workers

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kube::Resource;
use tracing::{debug, error, warn};
use workqueue::WorkQueue;

use crate::error::ReconcileError;
use crate::informer::{Informer, ResourceEventHandler, WatchedResource};

/// Identifies an object that may need reconciling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of `obj`, or `None` if it has no name.
    pub fn from_resource<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        let name = meta.name.clone()?;
        Some(Self {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Business logic of a queue-bearing controller.
#[async_trait]
pub trait Reconciler<K>: Send + Sync {
    /// Reconciles `key`. `object` is `None` when the key is not in the cache
    /// (deleted, or not listed yet) and should be treated as not found.
    async fn reconcile(&self, key: &ObjectKey, object: Option<Arc<K>>) -> Result<(), ReconcileError>;
}

/// Whether a controller needs worker loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Queued,
    HandlerOnly,
}

/// Worker entry point of a queue-bearing controller.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    fn name(&self) -> &str;

    /// Processes keys until the queue is shut down and drained.
    async fn run_worker(&self);

    /// Shuts the queue down so running workers drain and return.
    fn shut_down_queue(&self);

    /// Drops the queue's metric series once the controller is retired.
    fn remove_queue_metrics(&self);
}

/// A controller for one resource kind inside a group.
pub trait ResourceController: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ControllerKind;

    /// Subscribes the controller to its informer.
    fn add_event_handler(&self);

    /// Worker entry point, for queue-bearing controllers only.
    fn worker_runner(self: Arc<Self>) -> Option<Arc<dyn WorkerRunner>>;
}

/// Enqueues the key of every notified object.
struct EnqueueHandler<K> {
    controller: String,
    queue: WorkQueue<ObjectKey>,
    _kind: PhantomData<fn(K)>,
}

impl<K: Resource> EnqueueHandler<K> {
    fn enqueue(&self, obj: &K) {
        match ObjectKey::from_resource(obj) {
            Some(key) => {
                debug!(controller = %self.controller, key = %key, "Enqueueing");
                self.queue.add(key);
            }
            None => warn!(controller = %self.controller, "Ignoring object without a name"),
        }
    }
}

#[async_trait]
impl<K: Resource + Send + Sync + 'static> ResourceEventHandler<K> for EnqueueHandler<K> {
    async fn on_add(&self, obj: &Arc<K>) {
        self.enqueue(obj);
    }

    async fn on_update(&self, _old: &Arc<K>, new: &Arc<K>) {
        self.enqueue(new);
    }

    async fn on_delete(&self, obj: &Arc<K>) {
        self.enqueue(obj);
    }
}

/// Watch, queue and worker for one resource kind.
pub struct QueuedController<K: WatchedResource, R> {
    name: String,
    informer: Arc<Informer<K>>,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<R>,
    max_retries: u32,
    dropped: AtomicU64,
}

impl<K: WatchedResource, R> fmt::Debug for QueuedController<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedController")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl<K, R> QueuedController<K, R>
where
    K: WatchedResource,
    R: Reconciler<K> + 'static,
{
    pub fn new(
        name: impl Into<String>,
        informer: Arc<Informer<K>>,
        queue: WorkQueue<ObjectKey>,
        reconciler: Arc<R>,
        max_retries: u32,
    ) -> Self {
        Self {
            name: name.into(),
            informer,
            queue,
            reconciler,
            max_retries,
            dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    /// Keys given up on since the controller was created.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Takes one key off the queue and reconciles it.
    ///
    /// Returns `false` once the queue is shut down and drained.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let object = self.informer.get(&key.namespace, &key.name);
        match self.reconciler.reconcile(&key, object).await {
            Ok(()) => {
                debug!(controller = %self.name, key = %key, "Reconciled");
                self.queue.forget(&key);
            }
            Err(e) if e.is_transient() && self.queue.num_requeues(&key) < self.max_retries => {
                warn!(
                    controller = %self.name,
                    key = %key,
                    retries = self.queue.num_requeues(&key),
                    error = %e,
                    "Reconcile failed, requeueing with backoff"
                );
                self.queue.add_rate_limited(key.clone());
            }
            Err(e) => {
                error!(
                    controller = %self.name,
                    key = %key,
                    retries = self.queue.num_requeues(&key),
                    error = %e,
                    "Dropping key after reconcile failure"
                );
                self.queue.forget(&key);
                self.queue.record_dropped();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.queue.done(&key);
        true
    }
}

#[async_trait]
impl<K, R> WorkerRunner for QueuedController<K, R>
where
    K: WatchedResource,
    R: Reconciler<K> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_worker(&self) {
        while self.process_next_item().await {}
    }

    fn shut_down_queue(&self) {
        self.queue.shut_down();
    }

    fn remove_queue_metrics(&self) {
        self.queue.remove_metrics();
    }
}

impl<K, R> ResourceController for QueuedController<K, R>
where
    K: WatchedResource,
    R: Reconciler<K> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::Queued
    }

    fn add_event_handler(&self) {
        self.informer.add_event_handler(Arc::new(EnqueueHandler::<K> {
            controller: self.name.clone(),
            queue: self.queue.clone(),
            _kind: PhantomData,
        }));
    }

    fn worker_runner(self: Arc<Self>) -> Option<Arc<dyn WorkerRunner>> {
        Some(self)
    }
}

/// Watch with inline handling for one resource kind.
pub struct HandlerController<K: WatchedResource, H> {
    name: String,
    informer: Arc<Informer<K>>,
    handler: Arc<H>,
}

impl<K: WatchedResource, H> fmt::Debug for HandlerController<K, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerController")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<K, H> HandlerController<K, H>
where
    K: WatchedResource,
    H: ResourceEventHandler<K> + 'static,
{
    pub fn new(name: impl Into<String>, informer: Arc<Informer<K>>, handler: Arc<H>) -> Self {
        Self {
            name: name.into(),
            informer,
            handler,
        }
    }
}

impl<K, H> ResourceController for HandlerController<K, H>
where
    K: WatchedResource,
    H: ResourceEventHandler<K> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::HandlerOnly
    }

    fn add_event_handler(&self) {
        self.informer
            .add_event_handler(Arc::clone(&self.handler) as Arc<dyn ResourceEventHandler<K>>);
    }

    fn worker_runner(self: Arc<Self>) -> Option<Arc<dyn WorkerRunner>> {
        None
    }
}
