//! Object schemas shared by the dual-pod actuation controllers.
//!
//! This crate defines:
//!
//! - **`LauncherPoolPolicy`**: how many idle launcher pods to keep per node,
//!   per launcher config, for each group of nodes.
//! - **`LauncherConfig`**: the pod blueprint a launcher pod is built from.
//! - **`EnhancedNodeSelector`**: label selector plus allocatable-resource
//!   ranges used to pick the nodes a pool rule applies to.
//! - **`LauncherIdentity`**: the typed form of the identity markers carried
//!   by every launcher pod.
//!
//! The identity markers are a public contract: the dual-pod matching
//! controller reads them to find idle launchers, and the admission policy
//! rejects any out-of-band change to them.

pub mod identity;
pub mod launcher_config;
pub mod policy;
pub mod selector;

pub use identity::{
    LauncherIdentity, IDLE_ANNOTATION, LAUNCHER_BASED_ANNOTATION, LAUNCHER_CONFIG_ANNOTATION,
    POLICY_NAME_ANNOTATION,
};
pub use launcher_config::{LauncherConfig, LauncherConfigSpec};
pub use policy::{
    LauncherCount, LauncherPoolPolicy, LauncherPoolPolicySpec, LauncherPoolPolicyStatus,
    NodePoolSpec,
};
pub use selector::{EnhancedNodeSelector, ResourceRange};

/// API group of the custom resources.
pub const API_GROUP: &str = "fma.llm-d.ai";

/// API version of the custom resources.
pub const API_VERSION: &str = "v1alpha1";
