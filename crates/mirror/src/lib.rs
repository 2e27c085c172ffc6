//! Tether mirror: reconciles tenant-cluster objects into isolated namespaces
//! of one host cluster.

#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod conversion;
pub mod manager;
pub mod reconciler;
pub mod registry;

pub use config::{DriftPolicy, MirrorConfig, OrphanPolicy, DEFAULT_WORKERS};
pub use controller::{Intake, MirrorController};
pub use conversion::{build_host_metadata, owner_of, provenance_labels, MirrorResource};
pub use manager::{ClusterAware, ControllerManager};
pub use reconciler::Mirror;
pub use registry::ClusterRegistry;
