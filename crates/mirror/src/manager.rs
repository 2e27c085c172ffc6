//! Explicit composition root: controllers are constructed by the caller and
//! handed to a [`ControllerManager`], which fans cluster lifecycle events out
//! to them and runs them until shutdown.

use std::collections::BTreeSet;
use std::sync::Arc;

use tether_core::{ClusterId, MirrorError, MirrorResult};
use tether_kubehub::ClusterHandle;
use tokio::sync::watch;
use tracing::{error, info};

use crate::controller::MirrorController;
use crate::conversion::MirrorResource;

/// The narrow surface the manager sees of a controller.
#[async_trait::async_trait]
pub trait ClusterAware: Send + Sync {
    fn name(&self) -> &str;
    fn add_cluster(&self, handle: &ClusterHandle) -> MirrorResult<()>;
    async fn remove_cluster(&self, id: &ClusterId) -> MirrorResult<usize>;
    async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>);
}

#[async_trait::async_trait]
impl<K: MirrorResource> ClusterAware for MirrorController<K> {
    fn name(&self) -> &str { MirrorController::name(self) }

    fn add_cluster(&self, handle: &ClusterHandle) -> MirrorResult<()> { MirrorController::add_cluster(self, handle) }

    async fn remove_cluster(&self, id: &ClusterId) -> MirrorResult<usize> {
        MirrorController::remove_cluster(self, id).await
    }

    async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) { MirrorController::run(self, shutdown).await }
}

#[derive(Default)]
pub struct ControllerManager {
    controllers: Vec<Arc<dyn ClusterAware>>,
    clusters: BTreeSet<ClusterId>,
}

impl ControllerManager {
    pub fn new() -> Self { Self::default() }

    pub fn add_controller(&mut self, controller: Arc<dyn ClusterAware>) {
        info!(controller = controller.name(), "controller registered");
        self.controllers.push(controller);
    }

    pub fn clusters(&self) -> impl Iterator<Item = &ClusterId> { self.clusters.iter() }

    /// Hand a newly joined tenant cluster to every controller. A controller
    /// that fails to watch it is logged and skipped; the rest still watch.
    pub fn add_cluster(&mut self, handle: &ClusterHandle) -> MirrorResult<()> {
        if !self.clusters.insert(handle.id.clone()) {
            return Err(MirrorError::DuplicateCluster(handle.id.to_string()));
        }
        for c in &self.controllers {
            if let Err(e) = c.add_cluster(handle) {
                error!(controller = c.name(), cluster = %handle.id, error = %e, "failed to watch cluster");
            }
        }
        Ok(())
    }

    /// Retract a tenant cluster from every controller.
    pub async fn remove_cluster(&mut self, id: &ClusterId) -> MirrorResult<()> {
        if !self.clusters.remove(id) {
            return Err(MirrorError::UnknownCluster(id.to_string()));
        }
        let mut first_err = None;
        for c in &self.controllers {
            match c.remove_cluster(id).await {
                Ok(purged) => info!(controller = c.name(), cluster = %id, purged, "cluster removed"),
                Err(e) => {
                    error!(controller = c.name(), cluster = %id, error = %e, "cluster removal incomplete");
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Run every controller until `shutdown` flips to true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let runs = self.controllers.iter().map(|c| Arc::clone(c).run(shutdown.clone()));
        futures::future::join_all(runs).await;
    }
}
