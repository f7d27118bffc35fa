//! Pod census: which pods count as idle launchers of a cell.

use fma_api::LauncherIdentity;
use k8s_openapi::api::core::v1::Pod;

/// One unit of count reconciliation: a launcher config on a node, under a
/// policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LauncherCell {
    pub namespace: String,
    pub policy: String,
    pub template: String,
    pub node: String,
}

impl std::fmt::Display for LauncherCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {} template {}", self.node, self.template)
    }
}

/// Returns true if `pod` is a live, idle launcher belonging to `cell`.
///
/// All of these must hold:
/// - the pod is in the cell's namespace (or carries no namespace, as in a
///   namespace-scoped listing)
/// - the pod is pinned to the cell's node
/// - the pod is not terminating
/// - the identity markers name the cell's policy and template, and the
///   idle marker is `"true"`
pub fn is_idle_launcher(pod: &Pod, cell: &LauncherCell) -> bool {
    if pod
        .metadata
        .namespace
        .as_deref()
        .is_some_and(|ns| ns != cell.namespace)
    {
        return false;
    }
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let node = pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
    if node != Some(cell.node.as_str()) {
        return false;
    }
    pod.metadata
        .annotations
        .as_ref()
        .and_then(LauncherIdentity::from_annotations)
        .is_some_and(|id| id.matches(&cell.policy, &cell.template))
}

/// Idle launchers of `cell` among `pods`, in listing order.
pub fn idle_launchers<'a>(pods: &'a [Pod], cell: &LauncherCell) -> Vec<&'a Pod> {
    pods.iter().filter(|p| is_idle_launcher(p, cell)).collect()
}
