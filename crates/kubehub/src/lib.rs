//! Tether kubehub: kube clients, tenant watches feeding the informer cache,
//! and the host-cluster API used by the mirror.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    core::NamespaceResourceScope,
    runtime::reflector::{ObjectRef, Store},
    Client, Config, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tether_core::ClusterId;
use tracing::info;

mod host;
mod watch;

pub use host::{HostApi, KubeHost};
pub use watch::{dispatch_watch_event, watch_tenant};

/// Namespaced, statically typed kube resource the mirror can work with.
pub trait NamespacedResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + DeserializeOwned
    + Serialize
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<T> NamespacedResource for T where
    T: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Build a client from an explicit kubeconfig, or from the ambient
/// environment (in-cluster / `KUBECONFIG` / `~/.kube/config`) when `None`.
pub async fn get_kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        None => Client::try_default().await.context("building default kube client"),
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            let cfg = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("loading kubeconfig {}", path.display()))?;
            Client::try_from(cfg).context("building kube client")
        }
    }
}

/// A tenant cluster handed to the registry by the fleet manager.
#[derive(Clone)]
pub struct ClusterHandle {
    pub id: ClusterId,
    pub client: Client,
}

impl ClusterHandle {
    pub fn new(id: ClusterId, client: Client) -> Self { Self { id, client } }

    pub async fn from_kubeconfig(id: ClusterId, path: &Path) -> Result<Self> {
        let client = get_kube_client(Some(path)).await.with_context(|| format!("tenant cluster {id}"))?;
        info!(cluster = %id, kubeconfig = %path.display(), "tenant client ready");
        Ok(Self { id, client })
    }
}

impl Debug for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Callback surface a tenant watch delivers its notifications to.
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, cluster: &ClusterId, obj: &K);
    fn on_update(&self, cluster: &ClusterId, old: &K, new: &K);
    fn on_delete(&self, cluster: &ClusterId, obj: &K);
}

/// Read-only view of one tenant cluster's informer cache.
pub trait TenantCache<K>: Send + Sync {
    fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<K>>;
}

impl<K: NamespacedResource> TenantCache<K> for Store<K> {
    fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.get(&ObjectRef::new(name).within(namespace))
    }
}
