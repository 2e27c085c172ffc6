//! Tether core types: tenant object identity, reconcile requests/results,
//! provenance constants and the tenant-to-host namespace translation.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod error;
mod naming;

pub use error::{is_already_exists, is_conflict, is_not_found, MirrorError, MirrorResult};
pub use naming::{to_host_namespace, validate_dns_label, DNS_LABEL_MAX};

/// Label on every host object naming the tenant cluster it was mirrored from.
pub const LABEL_CLUSTER: &str = "tether.dev/cluster";
/// Label on every host object naming its tenant namespace.
pub const LABEL_NAMESPACE: &str = "tether.dev/namespace";
/// Annotation carrying the tenant object's UID, when it had one.
pub const ANNOTATION_UID: &str = "tether.dev/uid";
/// Annotation carrying the full `cluster/namespace/name` owner key.
pub const ANNOTATION_OWNER: &str = "tether.dev/owner";

/// Identity of one tenant cluster. Always a valid DNS-1123 label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> MirrorResult<Self> {
        let id = id.into();
        validate_dns_label(&id).map_err(|why| MirrorError::InvalidCluster(format!("{id:?}: {why}")))?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for ClusterId {
    type Error = MirrorError;
    fn try_from(v: String) -> MirrorResult<Self> { Self::new(v) }
}

impl From<ClusterId> for String {
    fn from(v: ClusterId) -> Self { v.0 }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Work-queue key for one tenant-side object.
///
/// Renders as `cluster/namespace/name`. None of the three parts may contain a
/// `/` (cluster IDs are DNS labels, namespaces and names are validated by the
/// tenant API server), so the rendering is unique and parses back losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantObjectRef {
    pub cluster: ClusterId,
    pub namespace: String,
    pub name: String,
}

impl TenantObjectRef {
    pub fn new(cluster: ClusterId, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { cluster, namespace: namespace.into(), name: name.into() }
    }

    /// Host namespace this object mirrors into.
    pub fn host_namespace(&self) -> String {
        to_host_namespace(&self.cluster, &self.namespace)
    }
}

impl fmt::Display for TenantObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.namespace, self.name)
    }
}

impl FromStr for TenantObjectRef {
    type Err = MirrorError;

    fn from_str(s: &str) -> MirrorResult<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [cluster, namespace, name] if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(ClusterId::new(*cluster)?, *namespace, *name))
            }
            _ => Err(MirrorError::Malformed(format!("invalid object key {s:?} (expect cluster/namespace/name)"))),
        }
    }
}

/// Kind of change observed on a tenant object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    /// Fold a newly observed event into a still-pending one for the same key.
    ///
    /// A pending Create stays a Create through later updates, a Delete always
    /// wins, and anything observed after a Delete means the object is back.
    pub fn coalesce(self, next: EventKind) -> EventKind {
        match (self, next) {
            (_, EventKind::Delete) => EventKind::Delete,
            (EventKind::Create, EventKind::Update) => EventKind::Create,
            (EventKind::Delete, _) => EventKind::Create,
            (_, next) => next,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Event resolved against the tenant cache at dequeue time.
#[derive(Debug, Clone)]
pub enum ReconcileEvent<K> {
    Create(Arc<K>),
    Update(Arc<K>),
    Delete,
}

impl<K> ReconcileEvent<K> {
    pub fn kind(&self) -> EventKind {
        match self {
            ReconcileEvent::Create(_) => EventKind::Create,
            ReconcileEvent::Update(_) => EventKind::Update,
            ReconcileEvent::Delete => EventKind::Delete,
        }
    }
}

/// One unit of work handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct ReconcileRequest<K> {
    pub target: TenantObjectRef,
    pub event: ReconcileEvent<K>,
}

impl<K> ReconcileRequest<K> {
    pub fn new(target: TenantObjectRef, event: ReconcileEvent<K>) -> Self { Self { target, event } }
    pub fn kind(&self) -> EventKind { self.event.kind() }
}

/// Whether the queue should retry a key with backoff.
///
/// The worker treats any reconcile error as `REQUEUE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
}

impl ReconcileResult {
    pub const DONE: ReconcileResult = ReconcileResult { requeue: false };
    pub const REQUEUE: ReconcileResult = ReconcileResult { requeue: true };
}
