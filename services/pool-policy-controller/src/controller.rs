//! Controller runtime: work queue, workers, resync and watchers.
//!
//! Every trigger (watch event, resync tick, retry) only enqueues a
//! [`PolicyKey`]. The queue guarantees at most one pass per key at a time
//! and folds re-triggers that arrive mid-pass into one follow-up pass.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fma_api::{LauncherPoolPolicy, POLICY_NAME_ANNOTATION};
use fma_reconcile::{FailureBackoff, WorkQueue, DEFAULT_RESYNC_INTERVAL};
use futures_util::future::join_all;
use futures_util::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::{ClusterResult, PolicyKey};
use crate::config::{Config, DEFAULT_WORKERS};
use crate::health::Readiness;
use crate::reconciler::{PassOutcome, PoolPolicyReconciler};

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub workers: usize,
    pub resync_interval: Duration,
    /// Namespace to watch; `None` watches all namespaces.
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            watch_namespace: None,
        }
    }
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.workers,
            resync_interval: config.resync_interval,
            watch_namespace: config.watch_namespace.clone(),
        }
    }
}

/// Drives reconciliation passes off the work queue.
pub struct PoolPolicyController {
    reconciler: PoolPolicyReconciler,
    queue: Arc<WorkQueue<PolicyKey>>,
    backoff: Mutex<FailureBackoff<PolicyKey>>,
    readiness: Readiness,
    config: ControllerConfig,
}

impl PoolPolicyController {
    pub fn new(
        reconciler: PoolPolicyReconciler,
        config: ControllerConfig,
        readiness: Readiness,
    ) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            backoff: Mutex::new(FailureBackoff::default()),
            readiness,
            config,
        }
    }

    /// The queue watchers feed.
    pub fn queue(&self) -> &Arc<WorkQueue<PolicyKey>> {
        &self.queue
    }

    /// Request a pass for a policy.
    pub fn enqueue(&self, key: PolicyKey) {
        self.queue.add(key);
    }

    /// Consecutive failed passes recorded for a policy.
    pub fn failures(&self, key: &PolicyKey) -> u32 {
        self.lock_backoff().failures(key)
    }

    fn lock_backoff(&self) -> std::sync::MutexGuard<'_, FailureBackoff<PolicyKey>> {
        self.backoff.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take one key off the queue and run a pass for it.
    ///
    /// Returns `false` once the queue has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.next().await else {
            return false;
        };

        match self.reconciler.reconcile(&key).await {
            Ok(outcome) => {
                if outcome == PassOutcome::PolicyGone {
                    debug!(policy = %key, "Dropping deleted policy");
                }
                self.lock_backoff().forget(&key);
                self.queue.done(&key);
            }
            Err(e) => {
                let delay = self.lock_backoff().record_failure(key.clone());
                warn!(
                    policy = %key,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconcile failed, will retry"
                );
                self.queue.done(&key);
                self.queue.add_after(key, delay);
            }
        }
        true
    }

    async fn run_worker(&self, id: usize) {
        debug!(worker = id, "Starting reconcile worker");
        while self.process_next().await {}
        debug!(worker = id, "Reconcile worker stopped");
    }

    /// List every policy in scope and enqueue it.
    ///
    /// Marks the controller ready on success.
    pub async fn resync(&self) -> ClusterResult<usize> {
        let policies = self
            .reconciler
            .client()
            .list_policies(self.config.watch_namespace.as_deref())
            .await?;
        for policy in &policies {
            self.queue.add(PolicyKey::of(policy));
        }
        self.readiness.mark_ready();
        Ok(policies.len())
    }

    /// Resync on an interval until shutdown. The first resync runs at once.
    #[instrument(skip_all)]
    pub async fn run_resync(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.resync_interval.as_secs(),
            "Starting resync loop"
        );

        let mut interval = tokio::time::interval(self.config.resync_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.resync().await {
                        Ok(count) => debug!(policies = count, "Resync enqueued policies"),
                        Err(e) => warn!(error = %e, "Failed to list policies for resync"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Resync loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run the workers and the resync loop until shutdown.
    ///
    /// In-flight passes finish before this returns.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(workers = self.config.workers, "Starting pool policy controller");

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move { controller.run_worker(id).await })
            })
            .collect();

        self.run_resync(shutdown).await;

        self.queue.shutdown();
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Reconcile worker panicked");
            }
        }
        info!("Pool policy controller stopped");
    }
}

/// Enqueue every touched policy.
pub async fn watch_policies(
    client: Client,
    namespace: Option<String>,
    queue: Arc<WorkQueue<PolicyKey>>,
    shutdown: watch::Receiver<bool>,
) {
    let api: Api<LauncherPoolPolicy> = scoped_api(client, namespace.as_deref());
    watch_and_enqueue(api, "LauncherPoolPolicy", queue, shutdown, |policy| {
        Some(PolicyKey::of(policy))
    })
    .await;
}

/// Enqueue the owning policy of every touched launcher pod.
pub async fn watch_launcher_pods(
    client: Client,
    namespace: Option<String>,
    queue: Arc<WorkQueue<PolicyKey>>,
    shutdown: watch::Receiver<bool>,
) {
    let api: Api<Pod> = scoped_api(client, namespace.as_deref());
    watch_and_enqueue(api, "Pod", queue, shutdown, launcher_pod_policy).await;
}

/// The policy a launcher pod belongs to, from its policy marker.
pub fn launcher_pod_policy(pod: &Pod) -> Option<PolicyKey> {
    let policy = pod.annotations().get(POLICY_NAME_ANNOTATION)?;
    if policy.is_empty() {
        return None;
    }
    Some(PolicyKey::new(pod.namespace().unwrap_or_default(), policy))
}

fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

async fn watch_and_enqueue<K, F>(
    api: Api<K>,
    kind: &'static str,
    queue: Arc<WorkQueue<PolicyKey>>,
    mut shutdown: watch::Receiver<bool>,
    key_of: F,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(&K) -> Option<PolicyKey>,
{
    info!(kind, "Starting watcher");

    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .touched_objects()
        .boxed();

    loop {
        tokio::select! {
            item = stream.try_next() => match item {
                Ok(Some(object)) => {
                    if let Some(key) = key_of(&object) {
                        debug!(kind, policy = %key, "Watch event");
                        queue.add(key);
                    }
                }
                Ok(None) => {
                    warn!(kind, "Watch stream ended");
                    break;
                }
                Err(e) => warn!(kind, error = %e, "Watch error"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(kind, "Watcher shutting down");
                    break;
                }
            }
        }
    }
}
