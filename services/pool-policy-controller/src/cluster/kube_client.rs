//! Kubernetes-backed cluster client.

use async_trait::async_trait;
use fma_api::{LauncherConfig, LauncherPoolPolicy};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use super::{ClusterClient, ClusterError, ClusterResult, PolicyKey};

/// [`ClusterClient`] that talks to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn policies(&self, namespace: Option<&str>) -> Api<LauncherPoolPolicy> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_policy(&self, key: &PolicyKey) -> ClusterResult<LauncherPoolPolicy> {
        self.policies(Some(&key.namespace))
            .get(&key.name)
            .await
            .map_err(|e| ClusterError::from_kube("LauncherPoolPolicy", key.to_string(), e))
    }

    async fn list_policies(
        &self,
        namespace: Option<&str>,
    ) -> ClusterResult<Vec<LauncherPoolPolicy>> {
        let list = self
            .policies(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| {
                ClusterError::from_kube("LauncherPoolPolicy", namespace.unwrap_or("*"), e)
            })?;
        Ok(list.items)
    }

    async fn get_launcher_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<LauncherConfig> {
        Api::<LauncherConfig>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| {
                ClusterError::from_kube("LauncherConfig", format!("{namespace}/{name}"), e)
            })
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        let list = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::from_kube("Node", "*", e))?;
        Ok(list.items)
    }

    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<Pod>> {
        let list = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::from_kube("Pod", format!("{namespace}/*"), e))?;
        Ok(list.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> ClusterResult<Pod> {
        let created = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(ClusterError::Api)?;
        debug!(namespace, pod = %created.name_any(), "Created pod");
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        Api::<Pod>::namespaced(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ClusterError::from_kube("Pod", format!("{namespace}/{name}"), e))?;
        Ok(())
    }

    async fn replace_policy_status(&self, policy: &LauncherPoolPolicy) -> ClusterResult<()> {
        let name = policy.metadata.name.clone().ok_or_else(|| ClusterError::Invalid {
            kind: "LauncherPoolPolicy",
            reason: "metadata.name is not set".to_string(),
        })?;
        let namespace = policy.namespace().unwrap_or_default();
        let data = serde_json::to_vec(policy)?;

        self.policies(Some(&namespace))
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| {
                ClusterError::from_kube("LauncherPoolPolicy", format!("{namespace}/{name}"), e)
            })?;
        Ok(())
    }
}
