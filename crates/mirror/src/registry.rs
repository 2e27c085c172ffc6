use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use tether_core::{ClusterId, MirrorError, MirrorResult};
use tether_kubehub::{watch_tenant, ClusterHandle, EventHandler, TenantCache};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::conversion::MirrorResource;

struct Entry<K> {
    cache: Arc<dyn TenantCache<K>>,
    watch: Option<JoinHandle<()>>,
}

/// Tenant clusters currently being watched, with their informer caches.
///
/// Holds only a narrow [`EventHandler`] capability for routing events; it
/// never sees the controller that owns it.
pub struct ClusterRegistry<K> {
    handler: Arc<dyn EventHandler<K>>,
    clusters: Mutex<FxHashMap<ClusterId, Entry<K>>>,
}

impl<K: MirrorResource> ClusterRegistry<K> {
    pub fn new(handler: Arc<dyn EventHandler<K>>) -> Self {
        Self { handler, clusters: Mutex::new(FxHashMap::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<ClusterId, Entry<K>>> {
        self.clusters.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start watching `handle`'s cluster; its events are routed to the
    /// handler with the cluster id attached. Must run inside a tokio runtime.
    pub fn add_cluster(&self, handle: &ClusterHandle) -> MirrorResult<()> {
        let mut clusters = self.lock();
        if clusters.contains_key(&handle.id) {
            return Err(MirrorError::DuplicateCluster(handle.id.to_string()));
        }
        let (cache, fut) = watch_tenant::<K>(handle, Arc::clone(&self.handler));
        let watch = tokio::spawn(fut);
        clusters.insert(handle.id.clone(), Entry { cache: Arc::new(cache), watch: Some(watch) });
        info!(cluster = %handle.id, kind = %K::kind(&()), "watching tenant cluster");
        Ok(())
    }

    /// Register a cluster whose cache is fed by someone else (an external
    /// informer, or a test). Events must be pushed to the handler by the caller.
    pub fn attach(&self, id: ClusterId, cache: Arc<dyn TenantCache<K>>) -> MirrorResult<()> {
        let mut clusters = self.lock();
        if clusters.contains_key(&id) {
            return Err(MirrorError::DuplicateCluster(id.to_string()));
        }
        clusters.insert(id, Entry { cache, watch: None });
        Ok(())
    }

    /// Stop watching `id`. Returns whether it was registered.
    pub fn remove_cluster(&self, id: &ClusterId) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            warn!(cluster = %id, "remove of unknown cluster");
            return false;
        };
        if let Some(watch) = entry.watch {
            watch.abort();
        }
        info!(cluster = %id, kind = %K::kind(&()), "stopped watching tenant cluster");
        true
    }

    pub fn cache(&self, id: &ClusterId) -> Option<Arc<dyn TenantCache<K>>> {
        self.lock().get(id).map(|e| Arc::clone(&e.cache))
    }

    pub fn contains(&self, id: &ClusterId) -> bool { self.lock().contains_key(id) }

    /// Abort every watch; used on shutdown.
    pub fn clear(&self) {
        for (_, entry) in self.lock().drain() {
            if let Some(watch) = entry.watch {
                watch.abort();
            }
        }
    }
}
