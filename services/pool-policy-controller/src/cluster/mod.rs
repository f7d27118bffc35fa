//! Cluster API boundary.
//!
//! Every call that leaves the process goes through [`ClusterClient`]:
//! reading policies and launcher configs, listing nodes and pods, creating
//! and deleting pods, and writing policy status. These are the only
//! suspension points of a reconciliation pass.
//!
//! Two implementations are provided:
//! - [`KubeCluster`]: backed by the Kubernetes API via `kube`.
//! - [`InMemoryCluster`]: in-process fake for tests and local experiments.

mod kube_client;
mod memory;

use async_trait::async_trait;
use fma_api::{LauncherConfig, LauncherPoolPolicy};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use thiserror::Error;

pub use kube_client::KubeCluster;
pub use memory::InMemoryCluster;

/// Result type for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors returned by cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The API server rejected or failed the request.
    #[error("{0}")]
    Api(#[source] kube::Error),

    /// The object cannot be sent as-is (e.g. missing name).
    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// Map a `kube` error, folding 404 into [`ClusterError::NotFound`].
    pub fn from_kube(kind: &'static str, name: impl Into<String>, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 404 => Self::NotFound {
                kind,
                name: name.into(),
            },
            other => Self::Api(other),
        }
    }

    /// Returns true if the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Namespace/name of a `LauncherPoolPolicy`; the work-queue key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PolicyKey {
    pub namespace: String,
    pub name: String,
}

impl PolicyKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a policy object. Cluster-scoped objects get an empty namespace.
    pub fn of(policy: &LauncherPoolPolicy) -> Self {
        Self::new(policy.namespace().unwrap_or_default(), policy.name_any())
    }
}

impl std::fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Cluster operations used by the pool policy controller.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a policy, including its current status.
    async fn get_policy(&self, key: &PolicyKey) -> ClusterResult<LauncherPoolPolicy>;

    /// List policies in one namespace, or in all namespaces.
    async fn list_policies(&self, namespace: Option<&str>)
        -> ClusterResult<Vec<LauncherPoolPolicy>>;

    /// Fetch a launcher config by name.
    async fn get_launcher_config(&self, namespace: &str, name: &str)
        -> ClusterResult<LauncherConfig>;

    /// List every node in the cluster.
    async fn list_nodes(&self) -> ClusterResult<Vec<Node>>;

    /// List every pod in a namespace.
    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<Pod>>;

    /// Create a pod; `generateName` is honored.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> ClusterResult<Pod>;

    /// Delete a pod by name.
    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    /// Replace the status subresource of a policy.
    ///
    /// The object's resourceVersion is sent along, so a concurrent update
    /// fails with a conflict instead of being overwritten.
    async fn replace_policy_status(&self, policy: &LauncherPoolPolicy) -> ClusterResult<()>;
}
