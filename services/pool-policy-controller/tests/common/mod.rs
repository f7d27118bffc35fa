//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use fma_api::{
    EnhancedNodeSelector, LauncherConfig, LauncherConfigSpec, LauncherCount, LauncherIdentity,
    LauncherPoolPolicy, LauncherPoolPolicySpec, NodePoolSpec, ResourceRange,
};
use fma_pool_policy_controller::cluster::{InMemoryCluster, PolicyKey};
use fma_pool_policy_controller::factory::PodFactory;
use fma_pool_policy_controller::reconciler::PoolPolicyReconciler;
use k8s_openapi::api::core::v1::{Container, Node, NodeStatus, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta, Time,
};

pub const NAMESPACE: &str = "inference";
pub const POLICY: &str = "gpu-pool";

pub fn key() -> PolicyKey {
    PolicyKey::new(NAMESPACE, POLICY)
}

pub fn node(name: &str, labels: &[(&str, &str)], gpus: Option<&str>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        status: gpus.map(|gpus| NodeStatus {
            allocatable: Some(BTreeMap::from([(
                "nvidia.com/gpu".to_string(),
                Quantity(gpus.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn gpu_selector(gpu: &str) -> EnhancedNodeSelector {
    EnhancedNodeSelector {
        label_selector: LabelSelector {
            match_labels: Some(BTreeMap::from([("gpu".to_string(), gpu.to_string())])),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn min_gpus_selector(min: &str) -> EnhancedNodeSelector {
    EnhancedNodeSelector {
        allocatable_resources: BTreeMap::from([(
            "nvidia.com/gpu".to_string(),
            ResourceRange {
                min: Some(Quantity(min.to_string())),
                max: None,
            },
        )]),
        ..Default::default()
    }
}

pub fn invalid_selector() -> EnhancedNodeSelector {
    EnhancedNodeSelector {
        label_selector: LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "gpu".to_string(),
                operator: "Near".to_string(),
                values: Some(vec!["h100".to_string()]),
            }]),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn rule(selector: EnhancedNodeSelector, counts: &[(&str, u32)]) -> NodePoolSpec {
    NodePoolSpec {
        enhanced_node_selector: selector,
        count_for_launcher: counts
            .iter()
            .map(|(name, count)| LauncherCount {
                launcher_config_name: name.to_string(),
                launcher_count: *count,
            })
            .collect(),
    }
}

pub fn policy(rules: Vec<NodePoolSpec>) -> LauncherPoolPolicy {
    let mut policy = LauncherPoolPolicy::new(
        POLICY,
        LauncherPoolPolicySpec {
            launcher_pool_for_node_type: rules,
        },
    );
    policy.metadata.namespace = Some(NAMESPACE.to_string());
    policy.metadata.uid = Some("6f1c2a9e-policy".to_string());
    policy
}

pub fn launcher_config(name: &str) -> LauncherConfig {
    let mut config = LauncherConfig::new(
        name,
        LauncherConfigSpec {
            pod_template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        "app".to_string(),
                        "launcher".to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "launcher".to_string(),
                        image: Some("launcher:dev".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            max_sleeping_instances: None,
        },
    );
    config.metadata.namespace = Some(NAMESPACE.to_string());
    config
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .unwrap()
}

/// A launcher pod as it would look after creation.
pub fn launcher_pod(
    name: &str,
    template: &str,
    node: &str,
    idle: bool,
    created: Option<DateTime<Utc>>,
) -> Pod {
    let mut identity = LauncherIdentity::idle(POLICY, template);
    identity.idle = idle;
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            annotations: Some(identity.to_annotations()),
            creation_timestamp: created.map(Time),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn reconciler(cluster: &Arc<InMemoryCluster>) -> PoolPolicyReconciler {
    PoolPolicyReconciler::new(cluster.clone(), PodFactory::default())
}

/// Names of pods on `node` built from `template`, sorted.
pub fn pod_names(cluster: &InMemoryCluster, template: &str, node: &str) -> Vec<String> {
    let mut names: Vec<String> = cluster
        .pods()
        .iter()
        .filter(|p| p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node))
        .filter(|p| {
            p.metadata
                .annotations
                .as_ref()
                .and_then(LauncherIdentity::from_annotations)
                .is_some_and(|id| id.template_name == template)
        })
        .filter_map(|p| p.metadata.name.clone())
        .collect();
    names.sort();
    names
}
