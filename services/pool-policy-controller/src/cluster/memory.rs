//! In-memory cluster for tests and local experiments.
//!
//! Emulates the slice of API-server behavior the controller depends on:
//! `generateName`, creation timestamps, resourceVersion conflicts on status
//! writes, and 404 on missing objects. Failures can be injected per create
//! call, per node, for pod listings, and for status writes.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fma_api::{LauncherConfig, LauncherPoolPolicy, LauncherPoolPolicyStatus};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ErrorResponse;
use kube::ResourceExt;
use tracing::debug;

use super::{ClusterClient, ClusterError, ClusterResult, PolicyKey};

/// In-memory [`ClusterClient`].
pub struct InMemoryCluster {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    nodes: Vec<Node>,
    policies: BTreeMap<PolicyKey, LauncherPoolPolicy>,
    configs: BTreeMap<(String, String), LauncherConfig>,
    /// Pods in creation order.
    pods: Vec<Pod>,

    next_suffix: u64,
    next_resource_version: u64,
    clock: DateTime<Utc>,

    /// Per-call create outcomes; `true` fails the call. Consumed front first.
    create_script: VecDeque<bool>,
    failing_nodes: HashSet<String>,
    failing_status_writes: u32,
    failing_deletes: u32,
    /// Pods removed by someone else just before our delete call lands.
    vanishing_pods: HashSet<(String, String)>,
    fail_pod_lists: bool,

    create_calls: u32,
    delete_calls: u32,
    status_writes: u32,
}

impl MemoryState {
    fn resource_version(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

fn api_error(code: u16, reason: &str, message: impl Into<String>) -> ClusterError {
    ClusterError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    }))
}

impl InMemoryCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a node. Nodes are listed in insertion order.
    pub fn add_node(&self, node: Node) {
        self.lock().nodes.push(node);
    }

    /// Create or replace a policy, keeping any existing status.
    pub fn apply_policy(&self, mut policy: LauncherPoolPolicy) {
        let mut state = self.lock();
        let key = PolicyKey::of(&policy);
        if let Some(existing) = state.policies.get(&key) {
            if policy.status.is_none() {
                policy.status = existing.status.clone();
            }
        }
        if policy.metadata.generation.is_none() {
            policy.metadata.generation = Some(1);
        }
        policy.metadata.resource_version = Some(state.resource_version());
        state.policies.insert(key, policy);
    }

    /// Remove a policy.
    pub fn delete_policy(&self, key: &PolicyKey) {
        self.lock().policies.remove(key);
    }

    /// Create or replace a launcher config.
    pub fn apply_launcher_config(&self, config: LauncherConfig) {
        let key = (config.namespace().unwrap_or_default(), config.name_any());
        self.lock().configs.insert(key, config);
    }

    /// Insert a pod as-is, e.g. one created by someone else.
    pub fn insert_pod(&self, pod: Pod) {
        self.lock().pods.push(pod);
    }

    /// Snapshot of every pod, in creation order.
    pub fn pods(&self) -> Vec<Pod> {
        self.lock().pods.clone()
    }

    /// Look up one pod.
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock()
            .pods
            .iter()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
            .cloned()
    }

    /// Set an annotation on a pod, as an external controller would.
    pub fn annotate_pod(&self, namespace: &str, name: &str, key: &str, value: &str) -> bool {
        let mut state = self.lock();
        let Some(pod) = state
            .pods
            .iter_mut()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
        else {
            return false;
        };
        pod.annotations_mut()
            .insert(key.to_string(), value.to_string());
        true
    }

    /// Give a pod a deletion timestamp without removing it.
    pub fn mark_terminating(&self, namespace: &str, name: &str) -> bool {
        let mut state = self.lock();
        let now = state.clock;
        let Some(pod) = state
            .pods
            .iter_mut()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
        else {
            return false;
        };
        pod.metadata.deletion_timestamp = Some(Time(now));
        true
    }

    /// Script the outcome of upcoming create calls; `true` fails that call.
    pub fn script_create_failures(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.lock().create_script.extend(outcomes);
    }

    /// Fail every create of a pod pinned to this node.
    pub fn fail_creates_on_node(&self, node: &str) {
        self.lock().failing_nodes.insert(node.to_string());
    }

    /// Fail the next `count` status writes.
    pub fn fail_status_writes(&self, count: u32) {
        self.lock().failing_status_writes = count;
    }

    /// Fail the next `count` pod deletions with a server error.
    pub fn fail_deletes(&self, count: u32) {
        self.lock().failing_deletes = count;
    }

    /// Have a pod disappear right before it is deleted, so the delete call
    /// sees a 404 as if another actor removed it between list and delete.
    pub fn vanish_before_delete(&self, namespace: &str, name: &str) {
        self.lock()
            .vanishing_pods
            .insert((namespace.to_string(), name.to_string()));
    }

    /// Make pod listings fail (or succeed again).
    pub fn fail_pod_lists(&self, fail: bool) {
        self.lock().fail_pod_lists = fail;
    }

    /// Number of create calls received, including failed ones.
    pub fn create_calls(&self) -> u32 {
        self.lock().create_calls
    }

    /// Number of delete calls received, including ones for missing pods.
    pub fn delete_calls(&self) -> u32 {
        self.lock().delete_calls
    }

    /// Number of status writes that were persisted.
    pub fn status_writes(&self) -> u32 {
        self.lock().status_writes
    }

    /// Current status of a policy.
    pub fn policy_status(&self, key: &PolicyKey) -> Option<LauncherPoolPolicyStatus> {
        self.lock()
            .policies
            .get(key)
            .and_then(|p| p.status.clone())
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_policy(&self, key: &PolicyKey) -> ClusterResult<LauncherPoolPolicy> {
        self.lock()
            .policies
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "LauncherPoolPolicy",
                name: key.to_string(),
            })
    }

    async fn list_policies(
        &self,
        namespace: Option<&str>,
    ) -> ClusterResult<Vec<LauncherPoolPolicy>> {
        Ok(self
            .lock()
            .policies
            .iter()
            .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace == ns))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn get_launcher_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<LauncherConfig> {
        self.lock()
            .configs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "LauncherConfig",
                name: format!("{namespace}/{name}"),
            })
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self.lock().nodes.clone())
    }

    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<Pod>> {
        let state = self.lock();
        if state.fail_pod_lists {
            return Err(api_error(500, "InternalError", "etcd unavailable"));
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> ClusterResult<Pod> {
        let mut state = self.lock();
        state.create_calls += 1;

        let scripted_failure = state.create_script.pop_front().unwrap_or(false);
        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default();
        if scripted_failure || state.failing_nodes.contains(&node) {
            return Err(api_error(
                403,
                "Forbidden",
                format!("pods is forbidden: exceeded quota in namespace {namespace}"),
            ));
        }

        let mut created = pod.clone();
        if created.metadata.name.is_none() {
            state.next_suffix += 1;
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            created.metadata.name = Some(format!("{prefix}{:05x}", state.next_suffix));
        }
        let name = created.name_any();
        if state
            .pods
            .iter()
            .any(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
        {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("pods \"{name}\" already exists"),
            ));
        }

        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(format!("uid-{name}"));
        created.metadata.creation_timestamp = Some(Time(state.clock));
        created.metadata.resource_version = Some(state.resource_version());
        state.clock += Duration::seconds(1);

        debug!(namespace, pod = %name, node = %node, "[MEMORY] Created pod");
        state.pods.push(created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.lock();
        state.delete_calls += 1;

        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(api_error(500, "InternalError", "etcdserver: request timed out"));
        }
        if state
            .vanishing_pods
            .remove(&(namespace.to_string(), name.to_string()))
        {
            state
                .pods
                .retain(|p| !(p.namespace().as_deref() == Some(namespace) && p.name_any() == name));
        }

        let Some(index) = state
            .pods
            .iter()
            .position(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
        else {
            return Err(ClusterError::NotFound {
                kind: "Pod",
                name: format!("{namespace}/{name}"),
            });
        };
        state.pods.remove(index);
        debug!(namespace, pod = %name, "[MEMORY] Deleted pod");
        Ok(())
    }

    async fn replace_policy_status(&self, policy: &LauncherPoolPolicy) -> ClusterResult<()> {
        let mut state = self.lock();
        if state.failing_status_writes > 0 {
            state.failing_status_writes -= 1;
            return Err(api_error(503, "ServiceUnavailable", "apiserver is shutting down"));
        }

        let key = PolicyKey::of(policy);
        let current_version = match state.policies.get(&key) {
            Some(stored) => stored.metadata.resource_version.clone(),
            None => {
                return Err(ClusterError::NotFound {
                    kind: "LauncherPoolPolicy",
                    name: key.to_string(),
                })
            }
        };
        if policy.metadata.resource_version != current_version {
            return Err(api_error(
                409,
                "Conflict",
                format!(
                    "the object has been modified; \
                     please apply your changes to the latest version ({key})"
                ),
            ));
        }

        let resource_version = state.resource_version();
        if let Some(stored) = state.policies.get_mut(&key) {
            stored.status = policy.status.clone();
            stored.metadata.resource_version = Some(resource_version);
        }
        state.status_writes += 1;
        Ok(())
    }
}
