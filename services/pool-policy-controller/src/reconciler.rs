//! Pool policy reconciler.
//!
//! One pass per policy:
//! - Fetch the policy (a missing policy ends the pass quietly)
//! - List every node once
//! - For each rule, select matching nodes and resolve its launcher configs
//! - For each matching node and each count spec, converge the idle
//!   launcher count of that cell
//! - Write the aggregated status if it changed
//!
//! Cells are independent: a failure in one is recorded and the pass moves
//! on. Only a failed policy fetch or status write fails the pass, which
//! sends the key back through the queue with backoff.

use std::sync::Arc;

use fma_api::{LauncherConfig, LauncherPoolPolicy, NodePoolSpec};
use fma_reconcile::{select_newest, CountAction};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::census::{idle_launchers, LauncherCell};
use crate::cluster::{ClusterClient, ClusterError, PolicyKey};
use crate::factory::PodFactory;
use crate::selector::filter_nodes;
use crate::status::{needs_update, StatusAggregator};

/// Result type for reconciliation passes.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that fail a whole pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to get LauncherPoolPolicy {key}: {source}")]
    GetPolicy {
        key: PolicyKey,
        #[source]
        source: ClusterError,
    },

    #[error("failed to update status of LauncherPoolPolicy {key}: {source}")]
    StatusUpdate {
        key: PolicyKey,
        #[source]
        source: ClusterError,
    },
}

/// Failure of one cell. Rendered into the policy status.
#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("failed to list pods: {0}")]
    ListPods(#[source] ClusterError),

    #[error("failed to create {failed} of {attempted} launcher pods: {last}")]
    Create {
        failed: u32,
        attempted: u32,
        #[source]
        last: ClusterError,
    },

    #[error("failed to delete {failed} of {attempted} excess launcher pods: {last}")]
    Delete {
        failed: u32,
        attempted: u32,
        #[source]
        last: ClusterError,
    },
}

/// What happened in one cell.
#[derive(Debug)]
pub struct CellOutcome {
    /// Idle launchers counted before any action.
    pub observed: u32,
    pub desired: u32,
    pub created: u32,
    pub deleted: u32,
    pub error: Option<CellError>,
}

impl CellOutcome {
    fn new(observed: u32, desired: u32) -> Self {
        Self {
            observed,
            desired,
            created: 0,
            deleted: 0,
            error: None,
        }
    }
}

/// Statistics from a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub cells: u32,
    pub created: u32,
    pub deleted: u32,
    pub errors: usize,
    pub status_updated: bool,
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The policy no longer exists; nothing to do.
    PolicyGone,

    /// The pass ran to completion.
    Reconciled(PassSummary),
}

/// The pool policy reconciler.
pub struct PoolPolicyReconciler {
    client: Arc<dyn ClusterClient>,
    factory: PodFactory,
}

impl PoolPolicyReconciler {
    /// Create a new reconciler.
    pub fn new(client: Arc<dyn ClusterClient>, factory: PodFactory) -> Self {
        Self { client, factory }
    }

    /// The cluster client passes run against.
    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// Run a single pass for one policy.
    #[instrument(skip_all, fields(policy = %key))]
    pub async fn reconcile(&self, key: &PolicyKey) -> ReconcileResult<PassOutcome> {
        let policy = match self.client.get_policy(key).await {
            Ok(policy) => policy,
            Err(e) if e.is_not_found() => {
                debug!("Policy not found (deleted)");
                return Ok(PassOutcome::PolicyGone);
            }
            Err(e) => {
                return Err(ReconcileError::GetPolicy {
                    key: key.clone(),
                    source: e,
                })
            }
        };

        let generation = policy.metadata.generation.unwrap_or(0);
        debug!(generation, "Start reconcile");

        let mut aggregator = StatusAggregator::new();
        let mut summary = PassSummary::default();

        match self.client.list_nodes().await {
            Ok(nodes) => {
                let rules = &policy.spec.launcher_pool_for_node_type;
                for (index, rule) in rules.iter().enumerate() {
                    self.reconcile_rule(
                        &policy,
                        index,
                        rule,
                        &nodes,
                        &mut aggregator,
                        &mut summary,
                    )
                    .await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to list nodes");
                aggregator.record(format!("failed to list nodes: {e}"));
            }
        }

        summary.errors = aggregator.errors().len();
        let candidate = aggregator.finish(generation);

        if needs_update(policy.status.as_ref(), &candidate) {
            let mut updated = policy.clone();
            updated.status = Some(candidate);
            self.client
                .replace_policy_status(&updated)
                .await
                .map_err(|e| ReconcileError::StatusUpdate {
                    key: key.clone(),
                    source: e,
                })?;
            summary.status_updated = true;
        }

        if summary.created > 0 || summary.deleted > 0 || summary.errors > 0 {
            info!(
                cells = summary.cells,
                created = summary.created,
                deleted = summary.deleted,
                errors = summary.errors,
                status_updated = summary.status_updated,
                "Reconcile complete"
            );
        } else {
            debug!(cells = summary.cells, "Reconcile complete, no changes");
        }

        Ok(PassOutcome::Reconciled(summary))
    }

    /// Reconcile every cell of one rule.
    async fn reconcile_rule(
        &self,
        policy: &LauncherPoolPolicy,
        index: usize,
        rule: &NodePoolSpec,
        nodes: &[Node],
        aggregator: &mut StatusAggregator,
        summary: &mut PassSummary,
    ) {
        let selector = &rule.enhanced_node_selector;
        let matching = match filter_nodes(nodes, selector) {
            Ok(matching) => matching,
            Err(e) => {
                warn!(
                    rule = index,
                    selector = %selector,
                    error = %e,
                    "Invalid enhanced node selector"
                );
                aggregator.record(format!("rule {index}: invalid node selector: {e}"));
                return;
            }
        };
        if matching.is_empty() {
            debug!(rule = index, selector = %selector, "No matching nodes for selector");
            return;
        }

        let namespace = policy.namespace().unwrap_or_default();
        let mut configs: Vec<(LauncherConfig, u32)> = Vec::new();
        for count in &rule.count_for_launcher {
            let name = &count.launcher_config_name;
            if name.is_empty() {
                warn!(rule = index, "Skipping count spec with empty launcherConfigName");
                aggregator.record(format!("rule {index}: launcherConfigName is empty"));
                continue;
            }
            match self.client.get_launcher_config(&namespace, name).await {
                Ok(config) => configs.push((config, count.launcher_count)),
                Err(e) => {
                    warn!(
                        rule = index,
                        launcher_config = %name,
                        error = %e,
                        "Failed to get LauncherConfig"
                    );
                    aggregator.record(format!(
                        "failed to get LauncherConfig {namespace}/{name}: {e}"
                    ));
                }
            }
        }

        for node in matching {
            let node_name = node.name_any();
            for (config, desired) in &configs {
                let cell = LauncherCell {
                    namespace: namespace.clone(),
                    policy: policy.name_any(),
                    template: config.name_any(),
                    node: node_name.clone(),
                };
                let outcome = self.reconcile_cell(policy, config, &cell, *desired).await;

                summary.cells += 1;
                summary.created += outcome.created;
                summary.deleted += outcome.deleted;
                if let Some(e) = &outcome.error {
                    warn!(
                        node = %cell.node,
                        template = %cell.template,
                        error = %e,
                        "Failed to ensure launcher count"
                    );
                    aggregator.record(format!("{cell}: {e}"));
                }
                debug!(
                    node = %cell.node,
                    template = %cell.template,
                    observed = outcome.observed,
                    desired = outcome.desired,
                    "Node/LauncherConfig counts"
                );
            }
        }
    }

    /// Converge the idle launcher count of one cell.
    ///
    /// Creations and deletions are attempted in full even when some fail;
    /// the next pass retries whatever is left.
    #[instrument(skip_all, fields(node = %cell.node, template = %cell.template))]
    pub async fn reconcile_cell(
        &self,
        policy: &LauncherPoolPolicy,
        config: &LauncherConfig,
        cell: &LauncherCell,
        desired: u32,
    ) -> CellOutcome {
        let pods = match self.client.list_pods(&cell.namespace).await {
            Ok(pods) => pods,
            Err(e) => {
                let mut outcome = CellOutcome::new(0, desired);
                outcome.error = Some(CellError::ListPods(e));
                return outcome;
            }
        };

        let existing = idle_launchers(&pods, cell);
        let observed = u32::try_from(existing.len()).unwrap_or(u32::MAX);
        let mut outcome = CellOutcome::new(observed, desired);

        match CountAction::plan(observed, desired) {
            CountAction::Converged => {}
            CountAction::Create(to_create) => {
                let mut failed = 0;
                let mut last_error = None;
                for _ in 0..to_create {
                    match self
                        .factory
                        .create(self.client.as_ref(), policy, config, &cell.node)
                        .await
                    {
                        Ok(pod) => {
                            outcome.created += 1;
                            debug!(pod = %pod.name_any(), "Created launcher pod");
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to create launcher pod");
                            failed += 1;
                            last_error = Some(e);
                        }
                    }
                }
                if let Some(last) = last_error {
                    outcome.error = Some(CellError::Create {
                        failed,
                        attempted: to_create,
                        last,
                    });
                }
            }
            CountAction::Delete(to_delete) => {
                let victims = select_newest(existing, to_delete as usize, |p| {
                    (
                        p.metadata.creation_timestamp.as_ref().map(|t| t.0),
                        p.name_any(),
                    )
                });

                let mut failed = 0;
                let mut last_error = None;
                for pod in victims {
                    let name = pod.name_any();
                    match self.client.delete_pod(&cell.namespace, &name).await {
                        Ok(()) => {
                            outcome.deleted += 1;
                            info!(pod = %name, "Deleted excess launcher pod");
                        }
                        Err(e) if e.is_not_found() => {
                            outcome.deleted += 1;
                            debug!(pod = %name, "Excess launcher pod already gone");
                        }
                        Err(e) => {
                            warn!(pod = %name, error = %e, "Failed to delete excess launcher pod");
                            failed += 1;
                            last_error = Some(e);
                        }
                    }
                }
                if let Some(last) = last_error {
                    outcome.error = Some(CellError::Delete {
                        failed,
                        attempted: to_delete,
                        last,
                    });
                }
            }
        }

        outcome
    }
}
