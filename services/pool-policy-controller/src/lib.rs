//! Launcher pool policy controller.
//!
//! Keeps, for every (pool rule, launcher config, matching node) cell of each
//! `LauncherPoolPolicy`, exactly the requested number of idle launcher pods.
//! The crate ships the `pool-policy-controller` binary; the library surface
//! exists for integration testing.
//!
//! ## Modules
//!
//! - `selector`: enhanced node selector evaluation
//! - `census`: idle launcher counting per cell
//! - `factory`: launcher pod construction
//! - `reconciler`: one reconciliation pass per policy
//! - `status`: policy status aggregation
//! - `controller`: work queue, workers, resync and watchers
//! - `cluster`: cluster access boundary (Kubernetes and in-memory)

pub mod census;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod factory;
pub mod health;
pub mod reconciler;
pub mod selector;
pub mod status;

use fma_api::{LauncherConfig, LauncherPoolPolicy};
use kube::CustomResourceExt;

/// Multi-document YAML of the CustomResourceDefinitions this controller
/// serves.
pub fn crd_manifests() -> Result<String, serde_yaml::Error> {
    let policy = serde_yaml::to_string(&LauncherPoolPolicy::crd())?;
    let config = serde_yaml::to_string(&LauncherConfig::crd())?;
    Ok(format!("---\n{policy}---\n{config}"))
}
