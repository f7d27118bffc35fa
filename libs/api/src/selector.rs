//! Enhanced node selector schema.
//!
//! Evaluation against live nodes lives with the controller; this module
//! only carries the wire shape.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Node selector over labels and allocatable resources.
///
/// A node matches when it satisfies the label selector and every
/// allocatable-resource range. An empty selector matches every node.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedNodeSelector {
    /// Standard Kubernetes label selector.
    #[serde(default)]
    pub label_selector: LabelSelector,

    /// Resource name (e.g. `nvidia.com/gpu`, `memory`) to an inclusive
    /// range on the node's allocatable quantity.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocatable_resources: BTreeMap<String, ResourceRange>,
}

/// Inclusive bounds on a resource quantity. Either bound may be omitted.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Quantity>,
}

impl std::fmt::Display for EnhancedNodeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(labels) = &self.label_selector.match_labels {
            for (k, v) in labels {
                parts.push(format!("{k}={v}"));
            }
        }
        if let Some(exprs) = &self.label_selector.match_expressions {
            for expr in exprs {
                let values = expr.values.as_deref().unwrap_or_default().join(",");
                parts.push(format!("{} {} ({})", expr.key, expr.operator, values));
            }
        }
        for (name, range) in &self.allocatable_resources {
            let min = range.min.as_ref().map(|q| q.0.as_str()).unwrap_or("");
            let max = range.max.as_ref().map(|q| q.0.as_str()).unwrap_or("");
            parts.push(format!("{name} in [{min}, {max}]"));
        }
        if parts.is_empty() {
            write!(f, "<all nodes>")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}
