use std::fmt;
use std::str::FromStr;

use kube::api::PropagationPolicy;
use tether_store::ItemBackoff;

/// What an Update event does to an existing host copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriftPolicy {
    /// One-shot mirror: updates are acknowledged and ignored.
    #[default]
    Off,
    /// Re-project the tenant object and replace the host copy when they differ.
    Enforce,
}

/// What removing a tenant cluster does to its mirrored objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Stop watching; leave mirrored objects in place.
    #[default]
    Retain,
    /// Stop watching, then delete every host object labelled with the cluster.
    Purge,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($s => Ok(Self::$variant),)+
                    other => Err(format!("unknown value {other:?} (expected one of: {})", [$($s),+].join(", "))),
                }
            }
        }
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self { $(Self::$variant => f.write_str($s),)+ }
            }
        }
    };
}

str_enum!(DriftPolicy { Off => "off", Enforce => "enforce" });
str_enum!(OrphanPolicy { Retain => "retain", Purge => "purge" });

/// Runtime knobs for one mirror controller.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Concurrent reconcile workers draining the queue.
    pub workers: usize,
    pub drift: DriftPolicy,
    pub orphans: OrphanPolicy,
    /// Create the translated host namespace before mirroring into it.
    pub create_namespaces: bool,
    /// Propagation policy for host deletes; dependents go with the object.
    pub propagation: PropagationPolicy,
    pub backoff: ItemBackoff,
}

pub const DEFAULT_WORKERS: usize = 3;

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            drift: DriftPolicy::default(),
            orphans: OrphanPolicy::default(),
            create_namespaces: true,
            propagation: PropagationPolicy::Background,
            backoff: ItemBackoff::default(),
        }
    }
}
