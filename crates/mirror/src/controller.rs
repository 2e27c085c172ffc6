//! Worker pool tying the tenant event intake, the work queue and the
//! dispatcher together for one resource kind.

use std::sync::{Arc, Mutex, MutexGuard};

use kube::Resource;
use rustc_hash::FxHashMap;
use tether_core::{
    ClusterId, EventKind, MirrorResult, ReconcileEvent, ReconcileRequest, ReconcileResult, TenantObjectRef,
};
use tether_kubehub::{ClusterHandle, EventHandler, HostApi};
use tether_store::WorkQueue;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{MirrorConfig, OrphanPolicy};
use crate::conversion::MirrorResource;
use crate::reconciler::Mirror;
use crate::registry::ClusterRegistry;

/// Turns tenant notifications into queue keys.
///
/// Remembers the kind of the pending change per key so the dispatcher can
/// tell a first sighting (Create) from a change (Update) once it resolves the
/// key against the cache.
pub struct Intake {
    queue: WorkQueue<TenantObjectRef>,
    pending: Mutex<FxHashMap<TenantObjectRef, EventKind>>,
}

impl Intake {
    fn new(queue: WorkQueue<TenantObjectRef>) -> Self {
        Self { queue, pending: Mutex::new(FxHashMap::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<TenantObjectRef, EventKind>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, key: TenantObjectRef, kind: EventKind) {
        {
            let mut pending = self.lock();
            let merged = match pending.get(&key) {
                Some(prev) => prev.coalesce(kind),
                None => kind,
            };
            pending.insert(key.clone(), merged);
        }
        self.queue.add(key);
    }

    fn take(&self, key: &TenantObjectRef) -> Option<EventKind> { self.lock().remove(key) }

    /// Put back the kind of a failed attempt underneath anything newer.
    fn restore(&self, key: &TenantObjectRef, kind: EventKind) {
        let mut pending = self.lock();
        let merged = match pending.get(key) {
            Some(newer) => kind.coalesce(*newer),
            None => kind,
        };
        pending.insert(key.clone(), merged);
    }

    fn forget_cluster(&self, cluster: &ClusterId) {
        self.lock().retain(|k, _| &k.cluster != cluster);
    }
}

fn key_of<K: Resource>(cluster: &ClusterId, obj: &K) -> Option<TenantObjectRef> {
    let meta = obj.meta();
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => {
            Some(TenantObjectRef::new(cluster.clone(), ns, name))
        }
        _ => {
            warn!(cluster = %cluster, namespace = ?meta.namespace, name = ?meta.name, "dropping event without namespace/name");
            None
        }
    }
}

impl<K: MirrorResource> EventHandler<K> for Intake {
    fn on_add(&self, cluster: &ClusterId, obj: &K) {
        if let Some(key) = key_of(cluster, obj) {
            self.record(key, EventKind::Create);
        }
    }

    fn on_update(&self, cluster: &ClusterId, old: &K, new: &K) {
        if old.meta().resource_version == new.meta().resource_version {
            // periodic resync, not a change
            return;
        }
        if let Some(key) = key_of(cluster, new) {
            self.record(key, EventKind::Update);
        }
    }

    fn on_delete(&self, cluster: &ClusterId, obj: &K) {
        if let Some(key) = key_of(cluster, obj) {
            self.record(key, EventKind::Delete);
        }
    }
}

/// Multi-cluster mirror controller for one resource kind.
pub struct MirrorController<K: MirrorResource> {
    name: String,
    queue: WorkQueue<TenantObjectRef>,
    intake: Arc<Intake>,
    registry: ClusterRegistry<K>,
    mirror: Mirror<K>,
}

impl<K: MirrorResource> MirrorController<K> {
    pub fn new(name: impl Into<String>, host: Arc<dyn HostApi<K>>, config: MirrorConfig) -> Self {
        let name = name.into();
        let queue = WorkQueue::new(name.clone(), config.backoff);
        let intake = Arc::new(Intake::new(queue.clone()));
        let registry = ClusterRegistry::new(Arc::clone(&intake) as Arc<dyn EventHandler<K>>);
        Self { name, queue, intake, registry, mirror: Mirror::new(host, config) }
    }

    pub fn name(&self) -> &str { &self.name }

    /// Inbound callback surface for tenant notifications.
    pub fn handler(&self) -> Arc<dyn EventHandler<K>> { Arc::clone(&self.intake) as Arc<dyn EventHandler<K>> }

    pub fn registry(&self) -> &ClusterRegistry<K> { &self.registry }

    pub fn queue(&self) -> &WorkQueue<TenantObjectRef> { &self.queue }

    pub fn add_cluster(&self, handle: &ClusterHandle) -> MirrorResult<()> {
        self.registry.add_cluster(handle)
    }

    /// Stop watching `id`, then apply the configured orphan policy. Returns
    /// how many host objects were purged.
    pub async fn remove_cluster(&self, id: &ClusterId) -> MirrorResult<usize> {
        self.registry.remove_cluster(id);
        self.intake.forget_cluster(id);
        match self.mirror.config().orphans {
            OrphanPolicy::Retain => Ok(0),
            OrphanPolicy::Purge => self.mirror.purge_cluster(id).await,
        }
    }

    /// Resolve a key against the tenant cache into a request.
    ///
    /// `None` means the key is stale (its cluster is gone) and is dropped.
    pub fn resolve(&self, key: &TenantObjectRef) -> Option<ReconcileRequest<K>> {
        let hint = self.intake.take(key);
        let Some(cache) = self.registry.cache(&key.cluster) else {
            debug!(key = %key, "cluster no longer registered; dropping key");
            return None;
        };
        let event = match (cache.lookup(&key.namespace, &key.name), hint) {
            (None, _) => ReconcileEvent::Delete,
            (Some(obj), Some(EventKind::Create | EventKind::Delete)) => ReconcileEvent::Create(obj),
            (Some(obj), Some(EventKind::Update) | None) => ReconcileEvent::Update(obj),
        };
        Some(ReconcileRequest::new(key.clone(), event))
    }

    /// Take one key off the queue and reconcile it. Returns `false` once the
    /// queue has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else { return false };
        if let Some(req) = self.resolve(&key) {
            let kind = req.kind();
            // errors are already logged with full context by the dispatcher
            let outcome = self.mirror.reconcile(&req).await.unwrap_or(ReconcileResult::REQUEUE);
            if outcome.requeue {
                self.intake.restore(&key, kind);
                self.queue.add_rate_limited(key.clone());
            } else {
                self.queue.forget(&key);
            }
        } else {
            self.queue.forget(&key);
        }
        self.queue.done(&key);
        true
    }

    /// Run `workers` reconcile loops until `shutdown` flips to true, then stop
    /// dequeuing and wait for in-flight reconciles to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let workers = self.mirror.config().workers.max(1);
        info!(controller = %self.name, workers, "starting mirror controller");
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move { while this.process_next().await {} }));
        }
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        info!(controller = %self.name, in_flight = self.queue.in_flight(), "shutting down; draining in-flight reconciles");
        self.queue.shutdown();
        for h in futures::future::join_all(handles).await {
            if let Err(e) = h {
                warn!(controller = %self.name, error = %e, "worker task failed");
            }
        }
        self.registry.clear();
        info!(controller = %self.name, "mirror controller stopped");
    }
}
