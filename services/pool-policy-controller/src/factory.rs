//! Launcher pod construction.

use fma_api::{LauncherConfig, LauncherIdentity, LauncherPoolPolicy, LAUNCHER_BASED_ANNOTATION};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, warn};

use crate::cluster::{ClusterClient, ClusterResult};

/// Launcher image defaults.
///
/// The first non-empty source wins: an explicit image, else
/// `<registry>/<repository>:<tag>` when all three parts are set. With
/// neither, the template's images are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub explicit_image: Option<String>,
    pub registry: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
}

impl ImageConfig {
    /// The image to force onto launcher containers, if any.
    pub fn resolve(&self) -> Option<String> {
        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }

        if let Some(image) = non_empty(&self.explicit_image) {
            return Some(image.to_string());
        }
        match (
            non_empty(&self.registry),
            non_empty(&self.repository),
            non_empty(&self.tag),
        ) {
            (Some(registry), Some(repository), Some(tag)) => {
                Some(format!("{registry}/{repository}:{tag}"))
            }
            _ => None,
        }
    }
}

/// Builds launcher pods from launcher configs.
#[derive(Debug, Clone, Default)]
pub struct PodFactory {
    images: ImageConfig,
}

impl PodFactory {
    pub fn new(images: ImageConfig) -> Self {
        Self { images }
    }

    /// Build the pod for one new idle launcher of `config` on `node`.
    pub fn build(&self, policy: &LauncherPoolPolicy, config: &LauncherConfig, node: &str) -> Pod {
        let policy_name = policy.name_any();
        let config_name = config.name_any();
        let template = &config.spec.pod_template;

        let labels = template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.clone())
            .unwrap_or_default();
        let mut annotations = template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.clone())
            .unwrap_or_default();
        annotations.extend(LauncherIdentity::idle(&policy_name, &config_name).to_annotations());
        annotations.insert(LAUNCHER_BASED_ANNOTATION.to_string(), "true".to_string());

        let mut spec: PodSpec = template.spec.clone().unwrap_or_default();
        spec.node_name = Some(node.to_string());

        if let Some(image) = self.images.resolve() {
            if spec.containers.is_empty() {
                spec.containers.push(Container {
                    name: "launcher".to_string(),
                    image: Some(image.clone()),
                    ..Default::default()
                });
            } else {
                for container in &mut spec.containers {
                    container.image = Some(image.clone());
                }
            }
            debug!(image = %image, "Set launcher pod image");
        }

        if spec.restart_policy.as_deref().is_none_or(str::is_empty) {
            spec.restart_policy = Some("Always".to_string());
        }

        let owner_references = match policy.owner_ref(&()) {
            Some(owner) => Some(vec![owner]),
            None => {
                warn!(
                    policy = %policy_name,
                    "Policy has no uid; creating launcher without owner reference"
                );
                None
            }
        };

        Pod {
            metadata: ObjectMeta {
                generate_name: Some(format!("{policy_name}-{config_name}-{node}-")),
                namespace: policy.namespace(),
                labels: (!labels.is_empty()).then_some(labels),
                annotations: Some(annotations),
                owner_references,
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        }
    }

    /// Build and create one launcher pod. Returns the API error verbatim.
    pub async fn create(
        &self,
        client: &dyn ClusterClient,
        policy: &LauncherPoolPolicy,
        config: &LauncherConfig,
        node: &str,
    ) -> ClusterResult<Pod> {
        let pod = self.build(policy, config, node);
        let namespace = policy.namespace().unwrap_or_default();
        client.create_pod(&namespace, &pod).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fma_api::{
        LauncherConfigSpec, LauncherPoolPolicySpec, IDLE_ANNOTATION, LAUNCHER_CONFIG_ANNOTATION,
        POLICY_NAME_ANNOTATION,
    };
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use std::collections::BTreeMap;

    fn policy(uid: Option<&str>) -> LauncherPoolPolicy {
        let mut policy = LauncherPoolPolicy::new("pool", LauncherPoolPolicySpec::default());
        policy.metadata.namespace = Some("inference".to_string());
        policy.metadata.uid = uid.map(str::to_string);
        policy
    }

    fn config(containers: Vec<Container>, restart_policy: Option<&str>) -> LauncherConfig {
        let mut config = LauncherConfig::new(
            "vllm",
            LauncherConfigSpec {
                pod_template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(BTreeMap::from([("app".to_string(), "launcher".to_string())])),
                        annotations: Some(BTreeMap::from([(
                            IDLE_ANNOTATION.to_string(),
                            "false".to_string(),
                        )])),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers,
                        restart_policy: restart_policy.map(str::to_string),
                        ..Default::default()
                    }),
                },
                max_sleeping_instances: None,
            },
        );
        config.metadata.namespace = Some("inference".to_string());
        config
    }

    fn container(name: &str, image: &str) -> Container {
        Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_resolution_order() {
        let explicit = ImageConfig {
            explicit_image: Some("quay.io/x/launcher:v2".to_string()),
            registry: Some("ghcr.io".to_string()),
            repository: Some("fma/launcher".to_string()),
            tag: Some("v1".to_string()),
        };
        assert_eq!(explicit.resolve().as_deref(), Some("quay.io/x/launcher:v2"));

        let triple = ImageConfig {
            explicit_image: Some(String::new()),
            ..explicit.clone()
        };
        assert_eq!(triple.resolve().as_deref(), Some("ghcr.io/fma/launcher:v1"));

        let partial = ImageConfig {
            explicit_image: None,
            tag: None,
            ..explicit
        };
        assert_eq!(partial.resolve(), None);
        assert_eq!(ImageConfig::default().resolve(), None);
    }

    #[test]
    fn test_build_sets_identity_and_pins_node() {
        let factory = PodFactory::default();
        let pod = factory.build(
            &policy(Some("uid-1")),
            &config(vec![container("main", "template:v0")], None),
            "node-a",
        );

        let meta = &pod.metadata;
        assert_eq!(meta.generate_name.as_deref(), Some("pool-vllm-node-a-"));
        assert_eq!(meta.name, None);
        assert_eq!(meta.namespace.as_deref(), Some("inference"));

        let annotations = meta.annotations.as_ref().unwrap();
        assert_eq!(annotations[POLICY_NAME_ANNOTATION], "pool");
        assert_eq!(annotations[LAUNCHER_CONFIG_ANNOTATION], "vllm");
        // Identity markers win over template annotations.
        assert_eq!(annotations[IDLE_ANNOTATION], "true");
        assert_eq!(annotations[LAUNCHER_BASED_ANNOTATION], "true");
        assert_eq!(meta.labels.as_ref().unwrap()["app"], "launcher");

        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("node-a"));
        assert_eq!(spec.restart_policy.as_deref(), Some("Always"));
        assert_eq!(spec.containers[0].image.as_deref(), Some("template:v0"));

        let owners = meta.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "LauncherPoolPolicy");
        assert_eq!(owners[0].name, "pool");
        assert_eq!(owners[0].uid, "uid-1");
    }

    #[test]
    fn test_build_keeps_explicit_restart_policy() {
        let pod = PodFactory::default().build(
            &policy(Some("uid-1")),
            &config(vec![container("main", "x")], Some("OnFailure")),
            "node-a",
        );
        assert_eq!(
            pod.spec.unwrap().restart_policy.as_deref(),
            Some("OnFailure")
        );
    }

    #[test]
    fn test_build_overrides_every_container_image() {
        let factory = PodFactory::new(ImageConfig {
            explicit_image: Some("launcher:v9".to_string()),
            ..Default::default()
        });
        let pod = factory.build(
            &policy(Some("uid-1")),
            &config(vec![container("a", "x"), container("b", "y")], None),
            "node-a",
        );
        let images: Vec<_> = pod
            .spec
            .unwrap()
            .containers
            .into_iter()
            .map(|c| c.image.unwrap())
            .collect();
        assert_eq!(images, vec!["launcher:v9", "launcher:v9"]);
    }

    #[test]
    fn test_build_adds_launcher_container_when_template_has_none() {
        let factory = PodFactory::new(ImageConfig {
            explicit_image: Some("launcher:v9".to_string()),
            ..Default::default()
        });
        let pod = factory.build(&policy(Some("uid-1")), &config(vec![], None), "node-a");
        let containers = pod.spec.unwrap().containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "launcher");
        assert_eq!(containers[0].image.as_deref(), Some("launcher:v9"));
    }

    #[test]
    fn test_build_without_uid_skips_owner_reference() {
        let pod = PodFactory::default().build(
            &policy(None),
            &config(vec![container("main", "x")], None),
            "node-a",
        );
        assert_eq!(pod.metadata.owner_references, None);
        assert!(pod.metadata.annotations.is_some());
    }
}
