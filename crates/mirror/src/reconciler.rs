//! Reconciliation dispatcher and the idempotent host mutations behind it.

use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use metrics::{counter, histogram};
use tether_core::{
    is_already_exists, is_conflict, is_not_found, ClusterId, MirrorError, MirrorResult, ReconcileEvent, ReconcileRequest,
    ReconcileResult, TenantObjectRef,
};
use tether_kubehub::HostApi;
use tracing::{debug, error, info, warn};

use crate::config::{DriftPolicy, MirrorConfig};
use crate::conversion::{build_host_metadata, cluster_selector, drifted, provenance_labels, MirrorResource};

/// Projects tenant objects of kind `K` into the host cluster.
pub struct Mirror<K: MirrorResource> {
    host: Arc<dyn HostApi<K>>,
    config: MirrorConfig,
}

impl<K: MirrorResource> Mirror<K> {
    pub fn new(host: Arc<dyn HostApi<K>>, config: MirrorConfig) -> Self { Self { host, config } }

    pub fn config(&self) -> &MirrorConfig { &self.config }

    /// Dispatch one request. Any error means "retry this key with backoff".
    pub async fn reconcile(&self, req: &ReconcileRequest<K>) -> MirrorResult<ReconcileResult> {
        let t = &req.target;
        let kind = req.kind();
        info!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, event = %kind, "reconcile {}", K::kind(&()));
        let started = Instant::now();
        counter!("tether_reconcile_total", 1u64, "event" => kind.as_str());

        let res = match &req.event {
            ReconcileEvent::Create(obj) => self.reconcile_create(t, obj).await,
            ReconcileEvent::Update(obj) => self.reconcile_update(t, obj).await,
            ReconcileEvent::Delete => self.reconcile_remove(t).await,
        };
        histogram!("tether_reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);

        match res {
            Ok(()) => Ok(ReconcileResult::DONE),
            Err(e) => {
                counter!("tether_reconcile_errors", 1u64, "event" => kind.as_str());
                error!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, event = %kind, error = %e, "reconcile failed");
                Err(e)
            }
        }
    }

    fn desired(&self, t: &TenantObjectRef, obj: &K) -> MirrorResult<(String, K)> {
        let target_ns = t.host_namespace();
        let mut host_obj = build_host_metadata(&t.cluster, &target_ns, obj)?;
        host_obj.mutate_for_host();
        Ok((target_ns, host_obj))
    }

    /// The namespace call is idempotent and not a second mirror mutation.
    async fn reconcile_create(&self, t: &TenantObjectRef, obj: &K) -> MirrorResult<()> {
        let (target_ns, host_obj) = self.desired(t, obj)?;
        if self.config.create_namespaces {
            self.host.ensure_namespace(&target_ns, provenance_labels(&t.cluster, &t.namespace)).await?;
        }
        match self.host.create(&target_ns, &host_obj).await {
            Ok(_) => {
                debug!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, host_namespace = %target_ns, "mirrored");
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                info!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, "already exists in host cluster");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reconcile_update(&self, t: &TenantObjectRef, obj: &K) -> MirrorResult<()> {
        match self.config.drift {
            DriftPolicy::Off => {
                debug!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, "drift correction off; update ignored");
                Ok(())
            }
            DriftPolicy::Enforce => self.enforce(t, obj).await,
        }
    }

    async fn enforce(&self, t: &TenantObjectRef, obj: &K) -> MirrorResult<()> {
        let target_ns = t.host_namespace();
        let Some(live) = self.host.get(&target_ns, &t.name).await? else {
            return self.reconcile_create(t, obj).await;
        };
        let (_, mut desired) = self.desired(t, obj)?;
        desired.retain_host_allocated(&live);
        if !drifted(&desired, &live)? {
            debug!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, "host copy up to date");
            return Ok(());
        }
        desired.meta_mut().resource_version = live.resource_version();
        if let Err(e) = self.host.replace(&target_ns, &t.name, &desired).await {
            if is_conflict(&e) {
                debug!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, "host copy changed during replace");
            }
            return Err(e.into());
        }
        info!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, "host copy replaced");
        Ok(())
    }

    async fn reconcile_remove(&self, t: &TenantObjectRef) -> MirrorResult<()> {
        let target_ns = t.host_namespace();
        match self.host.delete(&target_ns, &t.name, self.config.propagation.clone()).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => {
                warn!(cluster = %t.cluster, namespace = %t.namespace, name = %t.name, "not found in host cluster");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every host object mirrored from `cluster`. Keeps going past
    /// individual failures and returns the first one after the sweep.
    pub async fn purge_cluster(&self, cluster: &ClusterId) -> MirrorResult<usize> {
        let selector = cluster_selector(cluster);
        let objs = self.host.list_labeled(&selector).await?;
        let mut purged = 0usize;
        let mut first_err: Option<MirrorError> = None;
        for obj in objs {
            let (Some(ns), name) = (obj.namespace(), obj.name_any()) else { continue };
            match self.host.delete(&ns, &name, self.config.propagation.clone()).await {
                Ok(()) => purged += 1,
                Err(e) if is_not_found(&e) => {}
                Err(e) => {
                    warn!(cluster = %cluster, namespace = %ns, name = %name, error = %e, "purge delete failed");
                    first_err.get_or_insert(e.into());
                }
            }
        }
        info!(cluster = %cluster, purged, "purged mirrored objects");
        match first_err {
            Some(e) => Err(e),
            None => Ok(purged),
        }
    }
}
