use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        reflector::{self, store::Writer, ObjectRef, Store},
        watcher::{self, Event},
        WatchStreamExt,
    },
};
use rustc_hash::FxHashMap;
use tether_core::ClusterId;
use tracing::{debug, info, warn};

use crate::{ClusterHandle, EventHandler, NamespacedResource};

/// Start list+watch of `K` across all namespaces of a tenant cluster.
///
/// Returns the informer cache and the future driving it; the caller decides
/// where to spawn it and aborts it to stop watching. Watch errors are logged
/// and retried with backoff, never surfaced.
pub fn watch_tenant<K: NamespacedResource>(
    handle: &ClusterHandle,
    handler: Arc<dyn EventHandler<K>>,
) -> (Store<K>, impl Future<Output = ()> + Send + 'static) {
    let api: Api<K> = Api::all(handle.client.clone());
    let cluster = handle.id.clone();
    let (reader, mut writer) = reflector::store::<K>();
    let cache = reader.clone();

    let fut = async move {
        let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);
        info!(cluster = %cluster, kind = %K::kind(&()), "tenant watch started");
        while let Some(ev) = stream.next().await {
            match ev {
                Ok(ev) => dispatch_watch_event(&cluster, &reader, &mut writer, ev, handler.as_ref()),
                Err(e) => warn!(cluster = %cluster, error = %e, "tenant watch error; backing off"),
            }
        }
        warn!(cluster = %cluster, "tenant watch stream ended");
    };
    (cache, fut)
}

/// Apply one watch event to the cache, then notify `handler`.
///
/// The cache is updated first so that a worker resolving the key afterwards
/// always sees at least this state. Restarts are diffed against the previous
/// cache contents: new objects are adds, survivors are updates, and objects
/// missing from the relist are deletes.
pub fn dispatch_watch_event<K: NamespacedResource>(
    cluster: &ClusterId,
    reader: &Store<K>,
    writer: &mut Writer<K>,
    ev: Event<K>,
    handler: &dyn EventHandler<K>,
) {
    match &ev {
        Event::Applied(obj) => {
            let old = reader.get(&ObjectRef::from_obj(obj));
            writer.apply_watcher_event(&ev);
            match old {
                Some(old) => handler.on_update(cluster, &old, obj),
                None => handler.on_add(cluster, obj),
            }
        }
        Event::Deleted(obj) => {
            writer.apply_watcher_event(&ev);
            handler.on_delete(cluster, obj);
        }
        Event::Restarted(list) => {
            let mut before: FxHashMap<ObjectRef<K>, Arc<K>> =
                reader.state().into_iter().map(|o| (ObjectRef::from_obj(o.as_ref()), o)).collect();
            writer.apply_watcher_event(&ev);
            debug!(cluster = %cluster, count = list.len(), previous = before.len(), "tenant watch relisted");
            for obj in list {
                match before.remove(&ObjectRef::from_obj(obj)) {
                    Some(old) => handler.on_update(cluster, &old, obj),
                    None => handler.on_add(cluster, obj),
                }
            }
            for (_, gone) in before {
                handler.on_delete(cluster, &gone);
            }
        }
    }
}
