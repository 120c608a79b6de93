//! Shared informers.
//!
//! An [`Informer`] lists and watches one resource kind in one namespace,
//! keeps the last-known objects in a `kube_runtime` reflector store and
//! fans add/update/delete notifications out to registered handlers.
//!
//! An [`InformerFactory`] hands out one informer per kind, so every
//! controller in a group that watches the same kind shares a single watch.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Resource kinds an informer can watch.
pub trait WatchedResource:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> WatchedResource for K where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

/// Receives notifications from an informer.
#[async_trait]
pub trait ResourceEventHandler<K>: Send + Sync {
    async fn on_add(&self, obj: &Arc<K>);
    async fn on_update(&self, old: &Arc<K>, new: &Arc<K>);
    async fn on_delete(&self, obj: &Arc<K>);
}

/// Watches one resource kind and keeps a local cache of it.
pub struct Informer<K: WatchedResource> {
    api: Api<K>,
    resync: Duration,
    writer: Mutex<Option<Writer<K>>>,
    store: Store<K>,
    handlers: RwLock<Vec<Arc<dyn ResourceEventHandler<K>>>>,
    synced: AtomicBool,
    synced_notify: Notify,
}

impl<K: WatchedResource> Debug for Informer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("kind", &K::kind(&()))
            .field("resync", &self.resync)
            .field("synced", &self.has_synced())
            .finish_non_exhaustive()
    }
}

impl<K: WatchedResource> Informer<K> {
    /// Creates an informer over `api`. A zero `resync` disables periodic resync.
    pub fn new(api: Api<K>, resync: Duration) -> Self {
        let writer = Writer::default();
        let store = writer.as_reader();
        Self {
            api,
            resync,
            writer: Mutex::new(Some(writer)),
            store,
            handlers: RwLock::new(Vec::new()),
            synced: AtomicBool::new(false),
            synced_notify: Notify::new(),
        }
    }

    /// Registers a handler. Handlers added after the informer started only
    /// see notifications delivered from then on.
    pub fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Cached object by namespace and name.
    #[must_use]
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.store.get(&ObjectRef::new(name).within(namespace))
    }

    /// Whether the initial listing has been delivered.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Waits until the initial listing has been delivered. Returns `false`
    /// if `token` is cancelled first.
    pub async fn wait_for_sync(&self, token: &CancellationToken) -> bool {
        loop {
            let notified = self.synced_notify.notified();
            let mut notified = pin!(notified);
            notified.as_mut().enable();

            if self.has_synced() {
                return true;
            }
            tokio::select! {
                () = token.cancelled() => return self.has_synced(),
                () = notified => {}
            }
        }
    }

    fn handlers(&self) -> Vec<Arc<dyn ResourceEventHandler<K>>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delivers notifications until `token` is cancelled.
    ///
    /// Watch errors are logged and retried with the default watcher backoff.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut writer) = writer else {
            warn!(kind = %K::kind(&()), "Informer is already running");
            return;
        };

        let kind = K::kind(&()).to_string();
        info!(kind = %kind, "Starting informer");

        let mut stream = pin!(watcher(self.api.clone(), watcher::Config::default()).default_backoff());

        let resync_enabled = !self.resync.is_zero();
        let period = if resync_enabled { self.resync } else { Duration::from_secs(3600) };
        let mut resync = tokio::time::interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Keys seen since the last relist started
        let mut relist: Option<HashSet<ObjectRef<K>>> = None;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = resync.tick(), if resync_enabled => self.resync_all().await,
                event = stream.next() => match event {
                    Some(Ok(event)) => self.handle_event(&mut writer, &mut relist, event).await,
                    Some(Err(e)) => warn!(kind = %kind, error = %e, "Watch error, retrying"),
                    None => {
                        warn!(kind = %kind, "Watch stream ended");
                        break;
                    }
                },
            }
        }

        debug!(kind = %kind, "Informer stopped");
    }

    /// Feeds `events` through the same path as a running watch.
    #[cfg(test)]
    pub(crate) async fn deliver(&self, events: impl IntoIterator<Item = watcher::Event<K>>) {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut writer) = writer else {
            panic!("informer is running, events cannot be fed by hand");
        };
        let mut relist = None;
        for event in events {
            self.handle_event(&mut writer, &mut relist, event).await;
        }
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer);
    }

    async fn handle_event(
        &self,
        writer: &mut Writer<K>,
        relist: &mut Option<HashSet<ObjectRef<K>>>,
        event: watcher::Event<K>,
    ) {
        match event {
            watcher::Event::Init => {
                *relist = Some(HashSet::new());
            }
            watcher::Event::InitApply(obj) => {
                if let Some(seen) = relist.as_mut() {
                    seen.insert(ObjectRef::from_obj(&obj));
                }
                self.apply(writer, obj).await;
            }
            watcher::Event::Apply(obj) => self.apply(writer, obj).await,
            watcher::Event::Delete(obj) => self.delete(writer, obj).await,
            watcher::Event::InitDone => {
                if let Some(seen) = relist.take() {
                    let vanished: Vec<Arc<K>> = self
                        .store
                        .state()
                        .into_iter()
                        .filter(|obj| !seen.contains(&ObjectRef::from_obj(&**obj)))
                        .collect();
                    for obj in vanished {
                        self.delete(writer, (*obj).clone()).await;
                    }
                }
                if !self.synced.swap(true, Ordering::SeqCst) {
                    debug!(kind = %K::kind(&()), objects = self.store.state().len(), "Informer cache synced");
                    self.synced_notify.notify_waiters();
                }
            }
        }
    }

    async fn apply(&self, writer: &mut Writer<K>, obj: K) {
        let key = ObjectRef::from_obj(&obj);
        let old = self.store.get(&key);
        writer.apply_watcher_event(&watcher::Event::Apply(obj));
        let Some(new) = self.store.get(&key) else {
            return;
        };

        let handlers = self.handlers();
        match old {
            Some(old) => {
                for handler in &handlers {
                    handler.on_update(&old, &new).await;
                }
            }
            None => {
                for handler in &handlers {
                    handler.on_add(&new).await;
                }
            }
        }
    }

    async fn delete(&self, writer: &mut Writer<K>, obj: K) {
        let deleted = Arc::new(obj.clone());
        writer.apply_watcher_event(&watcher::Event::Delete(obj));
        for handler in &self.handlers() {
            handler.on_delete(&deleted).await;
        }
    }

    async fn resync_all(&self) {
        let handlers = self.handlers();
        for obj in self.store.state() {
            for handler in &handlers {
                handler.on_update(&obj, &obj).await;
            }
        }
    }
}

/// Type-erased view of an informer, used by the factory to start them.
#[async_trait]
trait SharedInformer: Send + Sync {
    fn spawn_run(self: Arc<Self>, token: CancellationToken, tracker: &TaskTracker);
    fn has_synced(&self) -> bool;
    async fn wait_for_sync(&self, token: &CancellationToken) -> bool;
}

#[async_trait]
impl<K: WatchedResource> SharedInformer for Informer<K> {
    fn spawn_run(self: Arc<Self>, token: CancellationToken, tracker: &TaskTracker) {
        tracker.spawn(self.run(token));
    }

    fn has_synced(&self) -> bool {
        Informer::has_synced(self)
    }

    async fn wait_for_sync(&self, token: &CancellationToken) -> bool {
        Informer::wait_for_sync(self, token).await
    }
}

#[derive(Default)]
struct FactoryState {
    informers: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    runners: Vec<Arc<dyn SharedInformer>>,
    started: usize,
}

/// Produces shared informers for one client and namespace.
pub struct InformerFactory {
    client: Client,
    namespace: String,
    resync: Duration,
    state: Mutex<FactoryState>,
}

impl Debug for InformerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InformerFactory")
            .field("namespace", &self.namespace)
            .field("resync", &self.resync)
            .field("informers", &state.runners.len())
            .field("started", &state.started)
            .finish_non_exhaustive()
    }
}

impl InformerFactory {
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>, resync: Duration) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            resync,
            state: Mutex::new(FactoryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The shared informer for `K`, created on first use.
    pub fn informer<K>(&self) -> Arc<Informer<K>>
    where
        K: WatchedResource + Resource<Scope = NamespaceResourceScope>,
    {
        let mut state = self.lock();
        let id = TypeId::of::<K>();
        if let Some(existing) = state.informers.get(&id) {
            if let Ok(informer) = Arc::clone(existing).downcast::<Informer<K>>() {
                return informer;
            }
        }

        let api: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);
        let informer = Arc::new(Informer::new(api, self.resync));
        state
            .informers
            .insert(id, Arc::clone(&informer) as Arc<dyn Any + Send + Sync>);
        state
            .runners
            .push(Arc::clone(&informer) as Arc<dyn SharedInformer>);
        informer
    }

    /// Number of distinct informers handed out so far.
    #[must_use]
    pub fn informer_count(&self) -> usize {
        self.lock().runners.len()
    }

    /// Starts every informer not started yet. Delivery stops when `token`
    /// is cancelled; the delivery tasks are spawned on `tracker`.
    pub fn start(&self, token: &CancellationToken, tracker: &TaskTracker) {
        let pending: Vec<Arc<dyn SharedInformer>> = {
            let mut state = self.lock();
            let pending = state.runners[state.started..].to_vec();
            state.started = state.runners.len();
            pending
        };
        if pending.is_empty() {
            return;
        }
        debug!(namespace = %self.namespace, informers = pending.len(), "Starting informers");
        for informer in pending {
            informer.spawn_run(token.clone(), tracker);
        }
    }

    /// Whether every started informer has synced.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        let state = self.lock();
        state.runners[..state.started].iter().all(|informer| informer.has_synced())
    }

    /// Waits until every started informer has synced. Returns `false` if
    /// `token` is cancelled first.
    pub async fn wait_for_cache_sync(&self, token: &CancellationToken) -> bool {
        let started: Vec<Arc<dyn SharedInformer>> = {
            let state = self.lock();
            state.runners[..state.started].to_vec()
        };
        for informer in started {
            if !informer.wait_for_sync(token).await {
                return false;
            }
        }
        true
    }
}
