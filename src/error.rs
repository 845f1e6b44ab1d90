//! Error types for the expose-k8s operator

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while reconciling workload exposure
#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the Kubernetes API or its transport
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// A work queue key that does not split into `namespace/name`.
    ///
    /// Terminal for the item that carried it: retrying cannot make the
    /// key parseable.
    #[error("malformed work queue key {0:?}")]
    MalformedKey(String),

    /// One or both exposure deletions failed for a removed workload.
    ///
    /// Both deletions are always attempted; this aggregates whatever
    /// failed so a retry can finish the teardown.
    #[error("exposure teardown incomplete for {key}: {details}")]
    TeardownFailed { key: String, details: String },

    /// Invalid or unusable process configuration
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Whether the failed work item should be requeued with backoff.
    ///
    /// Everything except a malformed key is worth retrying: API errors
    /// are transient from the controller's point of view, and teardown
    /// aggregates only retryable API failures.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::MalformedKey(_))
    }
}
