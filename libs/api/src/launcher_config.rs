//! `LauncherConfig` custom resource.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Blueprint for launcher pods.
///
/// Read-only from the pool policy controller's point of view.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "fma.llm-d.ai",
    version = "v1alpha1",
    kind = "LauncherConfig",
    plural = "launcherconfigs",
    namespaced
)]
#[kube(shortname = "lc")]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfigSpec {
    /// Pod template copied into every launcher pod.
    pub pod_template: PodTemplateSpec,

    /// Upper bound on sleeping inference servers a launcher may hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sleeping_instances: Option<i32>,
}
