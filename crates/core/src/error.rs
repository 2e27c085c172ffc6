use thiserror::Error;

pub type MirrorResult<T> = Result<T, MirrorError>;

/// Failures surfaced by the mirror path.
///
/// Benign races (AlreadyExists on create, NotFound on delete) never become a
/// `MirrorError`; they are resolved where they happen.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MirrorError {
    /// Host or tenant API call failed (timeout, conflict, throttling, ...)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Tenant object could not be turned into a host object
    #[error("malformed object: {0}")]
    Malformed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid cluster id {0}")]
    InvalidCluster(String),

    #[error("cluster {0} is already registered")]
    DuplicateCluster(String),

    #[error("cluster {0} is not registered")]
    UnknownCluster(String),
}

impl MirrorError {
    pub fn malformed(msg: impl Into<String>) -> Self { Self::Malformed(msg.into()) }
}

fn api_status(err: &kube::Error) -> Option<(u16, &str)> {
    match err {
        kube::Error::Api(ae) => Some((ae.code, ae.reason.as_str())),
        _ => None,
    }
}

/// HTTP 409 with reason `AlreadyExists`.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(api_status(err), Some((409, "AlreadyExists")))
}

/// HTTP 409 with reason `Conflict` (stale resourceVersion).
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(api_status(err), Some((409, reason)) if reason != "AlreadyExists")
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(api_status(err), Some((404, _)))
}
