//! `LauncherPoolPolicy` custom resource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::selector::EnhancedNodeSelector;

/// Desired supply of idle launcher pods, grouped by node type.
///
/// Pods created for this policy live in the policy's namespace and are
/// built from `LauncherConfig` objects in that same namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "fma.llm-d.ai",
    version = "v1alpha1",
    kind = "LauncherPoolPolicy",
    plural = "launcherpoolpolicies",
    namespaced
)]
#[kube(status = "LauncherPoolPolicyStatus")]
#[kube(shortname = "lpp")]
#[serde(rename_all = "camelCase")]
pub struct LauncherPoolPolicySpec {
    /// Pool rules, processed in order.
    #[serde(default)]
    pub launcher_pool_for_node_type: Vec<NodePoolSpec>,
}

/// One pool rule: a node selector and the idle counts wanted on each
/// matching node.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Selects the nodes this rule applies to.
    #[serde(default)]
    pub enhanced_node_selector: EnhancedNodeSelector,

    /// Idle launcher counts per launcher config, processed in order.
    #[serde(default)]
    pub count_for_launcher: Vec<LauncherCount>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LauncherCount {
    /// Name of a `LauncherConfig` in the policy's namespace.
    pub launcher_config_name: String,

    /// Idle launcher pods wanted on each matching node.
    #[serde(default)]
    pub launcher_count: u32,
}

/// Observed state written by the pool policy controller.
///
/// Replaced wholesale on every pass.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LauncherPoolPolicyStatus {
    /// Generation of the spec the last pass worked from.
    #[serde(default)]
    pub observed_generation: i64,

    /// One entry per failed unit of work in the last pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}
