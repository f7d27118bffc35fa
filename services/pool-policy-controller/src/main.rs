//! Launcher pool policy controller binary.
//!
//! `pool-policy-controller` runs the controller against the cluster from
//! the ambient kubeconfig or in-cluster service account.
//! `pool-policy-controller crds` prints the CustomResourceDefinitions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fma_pool_policy_controller::{
    cluster::KubeCluster,
    config::Config,
    controller::{watch_launcher_pods, watch_policies, ControllerConfig, PoolPolicyController},
    crd_manifests,
    factory::PodFactory,
    health::{self, Readiness},
    reconciler::PoolPolicyReconciler,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    match std::env::args().nth(1).as_deref() {
        None => {}
        Some("crds") => {
            print!("{}", crd_manifests()?);
            return Ok(());
        }
        Some(other) => bail!("unknown command: {other} (expected no argument or `crds`)"),
    }

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FMA_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting launcher pool policy controller");
    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        workers = config.workers,
        resync_secs = config.resync_interval.as_secs(),
        launcher_image = config.images.resolve().as_deref().unwrap_or("<from template>"),
        "Configuration loaded"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let readiness = Readiness::new();
    let reconciler = PoolPolicyReconciler::new(
        Arc::new(KubeCluster::new(client.clone())),
        PodFactory::new(config.images.clone()),
    );
    let controller = Arc::new(PoolPolicyController::new(
        reconciler,
        ControllerConfig::from(&config),
        readiness.clone(),
    ));

    let policy_watch_handle = tokio::spawn(watch_policies(
        client.clone(),
        config.watch_namespace.clone(),
        Arc::clone(controller.queue()),
        shutdown_rx.clone(),
    ));
    let pod_watch_handle = tokio::spawn(watch_launcher_pods(
        client,
        config.watch_namespace.clone(),
        Arc::clone(controller.queue()),
        shutdown_rx.clone(),
    ));
    let controller_handle = tokio::spawn(Arc::clone(&controller).run(shutdown_rx.clone()));

    let listener = tokio::net::TcpListener::bind(&config.health_addr).await?;
    info!(addr = %config.health_addr, "Serving health probes");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, health::routes(readiness))
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("Health server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Health server exited"),
                Ok(Err(e)) => error!(error = %e, "Health server error"),
                Err(e) => error!(error = %e, "Health server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if tokio::time::timeout(shutdown_timeout, controller_handle).await.is_err() {
        warn!("Controller did not shut down in time");
    }
    if tokio::time::timeout(shutdown_timeout, policy_watch_handle).await.is_err() {
        warn!("Policy watcher did not shut down in time");
    }
    if tokio::time::timeout(shutdown_timeout, pod_watch_handle).await.is_err() {
        warn!("Pod watcher did not shut down in time");
    }

    info!("Pool policy controller shutdown complete");
    Ok(())
}
