use std::collections::BTreeMap;
use std::marker::PhantomData;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use kube::Client;
use metrics::counter;
use tether_core::is_already_exists;
use tracing::debug;

use crate::NamespacedResource;

/// Mutations the mirror issues against the host cluster.
///
/// Errors are returned untouched so callers can tell the benign
/// AlreadyExists / NotFound races apart from real failures.
#[async_trait::async_trait]
pub trait HostApi<K: NamespacedResource>: Send + Sync {
    async fn create(&self, namespace: &str, obj: &K) -> Result<K, kube::Error>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, kube::Error>;

    /// Full replace; `obj` must carry the live resourceVersion.
    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K, kube::Error>;

    async fn delete(&self, namespace: &str, name: &str, propagation: PropagationPolicy) -> Result<(), kube::Error>;

    /// All objects of this kind across namespaces matching a label selector.
    async fn list_labeled(&self, selector: &str) -> Result<Vec<K>, kube::Error>;

    /// Create `namespace` if absent. AlreadyExists is success.
    async fn ensure_namespace(&self, namespace: &str, labels: BTreeMap<String, String>) -> Result<(), kube::Error>;
}

/// [`HostApi`] backed by a live kube client.
pub struct KubeHost<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeHost<K> {
    pub fn new(client: Client) -> Self { Self { client, _kind: PhantomData } }
}

impl<K> Clone for KubeHost<K> {
    fn clone(&self) -> Self { Self::new(self.client.clone()) }
}

#[async_trait::async_trait]
impl<K: NamespacedResource> HostApi<K> for KubeHost<K> {
    async fn create(&self, namespace: &str, obj: &K) -> Result<K, kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        counter!("tether_host_calls", 1u64);
        api.create(&PostParams::default(), obj).await
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        counter!("tether_host_calls", 1u64);
        api.get_opt(name).await
    }

    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K, kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        counter!("tether_host_calls", 1u64);
        api.replace(name, &PostParams::default(), obj).await
    }

    async fn delete(&self, namespace: &str, name: &str, propagation: PropagationPolicy) -> Result<(), kube::Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let dp = DeleteParams { propagation_policy: Some(propagation), ..DeleteParams::default() };
        counter!("tether_host_calls", 1u64);
        api.delete(name, &dp).await.map(|_| ())
    }

    async fn list_labeled(&self, selector: &str) -> Result<Vec<K>, kube::Error> {
        let api: Api<K> = Api::all(self.client.clone());
        counter!("tether_host_calls", 1u64);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn ensure_namespace(&self, namespace: &str, labels: BTreeMap<String, String>) -> Result<(), kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta { name: Some(namespace.to_string()), labels: Some(labels), ..ObjectMeta::default() },
            ..Namespace::default()
        };
        counter!("tether_host_calls", 1u64);
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                debug!(namespace, "host namespace created");
                Ok(())
            }
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
