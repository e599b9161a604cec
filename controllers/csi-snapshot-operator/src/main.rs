//! CSI Snapshot Controller Operator
//!
//! Installs and keeps in shape the CSI volume snapshot feature of a cluster:
//! - the VolumeSnapshot, VolumeSnapshotContent and VolumeSnapshotClass CRDs
//! - the csi-snapshot-controller Deployment
//!
//! Progress and failures are reported as conditions on the cluster-scoped
//! `CSISnapshotController` object named `cluster`.

mod apply;
mod backoff;
mod conditions;
mod config;
mod controller;
mod error;
mod manifests;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;
mod workqueue;

use crate::config::OperatorConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to install SIGTERM handler, only Ctrl-C will stop the operator: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT"),
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            },
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls-tls feature needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting CSI Snapshot Controller Operator");

    let config = OperatorConfig::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    controller.run(shutdown_rx).await?;

    info!("CSI Snapshot Controller Operator stopped");
    Ok(())
}
