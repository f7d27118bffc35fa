//! Launcher identity markers.
//!
//! Every launcher pod created by the pool policy controller carries three
//! annotations that together say which policy produced it, which launcher
//! config it was built from, and whether it is still idle. The markers are
//! set once, at creation, and never rewritten by the pool policy controller.
//! The matching controller clears the idle marker when it binds the pod to
//! a requester, which takes the pod out of the pool.

use std::collections::BTreeMap;

/// Name of the `LauncherPoolPolicy` that created the pod.
pub const POLICY_NAME_ANNOTATION: &str = "dual-pods.llm-d.ai/launcher-pool-policy";

/// Name of the `LauncherConfig` the pod was built from.
pub const LAUNCHER_CONFIG_ANNOTATION: &str = "dual-pods.llm-d.ai/launcher-config";

/// `"true"` while the pod is unbound and available for matching.
pub const IDLE_ANNOTATION: &str = "dual-pods.llm-d.ai/idle-launcher";

/// Marks a pod as a launcher, independent of its binding state.
pub const LAUNCHER_BASED_ANNOTATION: &str = "dual-pods.llm-d.ai/launcher-based";

/// Typed view of the three identity markers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LauncherIdentity {
    pub policy_name: String,
    pub template_name: String,
    pub idle: bool,
}

impl LauncherIdentity {
    /// Identity of a freshly created launcher.
    pub fn idle(policy_name: impl Into<String>, template_name: impl Into<String>) -> Self {
        Self {
            policy_name: policy_name.into(),
            template_name: template_name.into(),
            idle: true,
        }
    }

    /// Serialize to the marker annotations.
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (POLICY_NAME_ANNOTATION.to_string(), self.policy_name.clone()),
            (
                LAUNCHER_CONFIG_ANNOTATION.to_string(),
                self.template_name.clone(),
            ),
            (IDLE_ANNOTATION.to_string(), self.idle.to_string()),
        ])
    }

    /// Parse from pod annotations.
    ///
    /// Returns `None` when any marker is missing or the idle marker is
    /// neither `"true"` nor `"false"`.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        let policy_name = annotations.get(POLICY_NAME_ANNOTATION)?;
        let template_name = annotations.get(LAUNCHER_CONFIG_ANNOTATION)?;
        let idle = match annotations.get(IDLE_ANNOTATION)?.as_str() {
            "true" => true,
            "false" => false,
            _ => return None,
        };
        Some(Self {
            policy_name: policy_name.clone(),
            template_name: template_name.clone(),
            idle,
        })
    }

    /// True when this is an idle launcher of exactly the given pair.
    pub fn matches(&self, policy_name: &str, template_name: &str) -> bool {
        self.idle && self.policy_name == policy_name && self.template_name == template_name
    }
}

impl std::fmt::Display for LauncherIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} (idle={})",
            self.policy_name, self.template_name, self.idle
        )
    }
}
