use anyhow::{Context, Result};
use bruteguard_core::ServiceConfig;
use bruteguard_db::Database;
use bruteguard_engine::AdmissionController;
use bruteguard_http::{HttpServer, SHUTDOWN_GRACE};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::config;

pub async fn init_config(config_path: &Path) -> Result<()> {
    let default_config = ServiceConfig::default();
    config::save_config(config_path, &default_config).await?;
    println!("Configuration file created at: {}", config_path.display());
    println!("\nPlease review and edit the configuration before starting the server.");
    Ok(())
}

pub async fn run(config: ServiceConfig) -> Result<()> {
    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting bruteguard"
    );

    let db = Arc::new(
        Database::new(&config.database_url)
            .await
            .context("Failed to initialize database")?,
    );
    // The URL carries credentials; keep it out of the log.
    info!("Database connection established");

    let store = super::connect_store(&config).await?;
    let controller = Arc::new(AdmissionController::from_config(&config, db.clone(), store));

    // A failed warm-up is retried by the first check.
    match controller.refresh_ip_lists().await {
        Ok(()) => info!("IP lists loaded"),
        Err(e) => warn!(error = %e, "Initial IP list load failed"),
    }

    let shutdown = shutdown_signal()?;
    let http_server = HttpServer::new(controller, config.http.clone());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut http_handle = tokio::spawn(async move {
        http_server
            .run(async {
                let _ = stop_rx.await;
            })
            .await
    });

    info!(
        limits = ?config.limits,
        cache_ttl_secs = config.cache.ttl_secs,
        "Bruteguard is running. Press Ctrl+C to stop."
    );

    let result = tokio::select! {
        // The server only ends on its own when it failed.
        result = &mut http_handle => {
            error!(event = "server_failed", "HTTP server exited unexpectedly");
            flatten(result)
        }
        _ = shutdown => {
            info!(event = "server_stopping", "Shutting down...");
            let _ = stop_tx.send(());
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut http_handle).await {
                Ok(result) => flatten(result),
                Err(_) => {
                    warn!("In-flight requests did not finish in time");
                    http_handle.abort();
                    Ok(())
                }
            }
        }
    };

    db.close().await;
    info!(event = "server_stopped", "Bruteguard stopped");
    result
}

fn flatten(result: std::result::Result<bruteguard_core::Result<()>, JoinError>) -> Result<()> {
    result
        .context("HTTP server task panicked")?
        .context("HTTP server failed")
}

/// Resolves on SIGINT, SIGTERM or SIGHUP.
///
/// Handlers are installed before returning so a signal that arrives while the
/// server is starting is not lost.
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let (mut terminate, mut hangup) = {
        use tokio::signal::unix::{SignalKind, signal};
        (
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?,
        )
    };

    Ok(async move {
        #[cfg(unix)]
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Received SIGINT (Ctrl+C)");
            }
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = hangup.recv() => info!("Received SIGHUP"),
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Received Ctrl+C");
        }
    })
}
