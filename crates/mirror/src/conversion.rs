//! Tenant → host object conversion: metadata rewrite, provenance stamping and
//! the per-kind field rewrites a relocated object needs.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort};
use kube::{Resource, ResourceExt};
use serde_json::Value as Json;
use tether_core::{
    ClusterId, MirrorError, MirrorResult, TenantObjectRef, ANNOTATION_OWNER, ANNOTATION_UID, LABEL_CLUSTER,
    LABEL_NAMESPACE,
};
use tether_kubehub::NamespacedResource;

/// A namespaced kind that can be mirrored into the host cluster.
pub trait MirrorResource: NamespacedResource {
    /// Rewrite fields that are only meaningful inside the tenant cluster.
    fn mutate_for_host(&mut self) {}

    /// Copy fields the host allocated on `live` into `self` before a replace.
    fn retain_host_allocated(&mut self, _live: &Self) {}
}

impl MirrorResource for ConfigMap {}

impl MirrorResource for Service {
    /// Cluster IPs and node ports belong to the tenant's allocators; the host
    /// assigns its own. Headless services keep `None`. The selector is kept
    /// and resolves against mirrored pods in the translated namespace.
    fn mutate_for_host(&mut self) {
        self.status = None;
        let Some(spec) = self.spec.as_mut() else { return };
        if spec.cluster_ip.as_deref() != Some("None") {
            spec.cluster_ip = None;
            spec.cluster_ips = None;
        }
        spec.health_check_node_port = None;
        for port in spec.ports.iter_mut().flatten() {
            port.node_port = None;
        }
    }

    fn retain_host_allocated(&mut self, live: &Self) {
        let (Some(spec), Some(live)) = (self.spec.as_mut(), live.spec.as_ref()) else { return };
        spec.cluster_ip = live.cluster_ip.clone();
        spec.cluster_ips = live.cluster_ips.clone();
        spec.ip_families = live.ip_families.clone();
        spec.ip_family_policy = live.ip_family_policy.clone();
        if spec.health_check_node_port.is_none() {
            spec.health_check_node_port = live.health_check_node_port;
        }
        let live_ports = live.ports.as_deref().unwrap_or_default();
        for port in spec.ports.iter_mut().flatten() {
            if port.node_port.is_none() {
                port.node_port = live_ports.iter().find(|p| same_port(p, port)).and_then(|p| p.node_port);
            }
        }
    }
}

fn same_port(a: &ServicePort, b: &ServicePort) -> bool {
    a.port == b.port && a.protocol == b.protocol && a.name == b.name
}

/// Labels stamped on every host object (and host namespace) from `cluster`.
pub fn provenance_labels(cluster: &ClusterId, namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
        (LABEL_NAMESPACE.to_string(), namespace.to_string()),
    ])
}

/// Label selector matching everything mirrored from `cluster`.
pub fn cluster_selector(cluster: &ClusterId) -> String {
    format!("{LABEL_CLUSTER}={cluster}")
}

/// Copy `obj` into `target_namespace`, dropping server-owned metadata and
/// stamping provenance so the host copy can be traced back to its tenant.
pub fn build_host_metadata<K: MirrorResource>(cluster: &ClusterId, target_namespace: &str, obj: &K) -> MirrorResult<K> {
    let name = obj.meta().name.clone().filter(|n| !n.is_empty()).ok_or_else(|| MirrorError::malformed("object has no name"))?;
    let source_ns = obj
        .meta()
        .namespace
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| MirrorError::malformed(format!("object {name} has no namespace")))?;
    let uid = obj.meta().uid.clone();

    let mut out = obj.clone();
    let meta = out.meta_mut();
    meta.namespace = Some(target_namespace.to_string());
    meta.resource_version = None;
    meta.uid = None;
    meta.self_link = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.generation = None;
    meta.managed_fields = None;
    meta.owner_references = None;
    meta.finalizers = None;
    meta.generate_name = None;

    meta.labels.get_or_insert_with(BTreeMap::new).extend(provenance_labels(cluster, &source_ns));
    let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(ANNOTATION_OWNER.to_string(), format!("{cluster}/{source_ns}/{name}"));
    match uid {
        Some(uid) => annotations.insert(ANNOTATION_UID.to_string(), uid),
        None => annotations.remove(ANNOTATION_UID),
    };
    Ok(out)
}

/// Reverse lookup: which tenant object does this host object mirror?
pub fn owner_of<K: Resource>(host_obj: &K) -> Option<TenantObjectRef> {
    let labels = host_obj.labels();
    let cluster = ClusterId::new(labels.get(LABEL_CLUSTER)?.as_str()).ok()?;
    let namespace = labels.get(LABEL_NAMESPACE)?;
    Some(TenantObjectRef::new(cluster, namespace.as_str(), host_obj.name_any()))
}

/// The parts of an object drift correction compares: everything but status
/// and server-managed metadata.
fn projection<K: MirrorResource>(obj: &K) -> MirrorResult<Json> {
    let mut v = serde_json::to_value(obj)?;
    if let Some(map) = v.as_object_mut() {
        map.remove("status");
        map.insert(
            "metadata".into(),
            serde_json::json!({ "labels": obj.meta().labels, "annotations": obj.meta().annotations }),
        );
    }
    Ok(v)
}

/// Whether the host copy `live` differs from the `desired` projection.
pub fn drifted<K: MirrorResource>(desired: &K, live: &K) -> MirrorResult<bool> {
    Ok(projection(desired)? != projection(live)?)
}
