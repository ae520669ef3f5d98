//! Object Cache - maintenance process
//!
//! Opens the cache described by the environment, reports what is on disk and
//! keeps sweeping expired entries until it is told to stop.

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use object_cache::{spawn_cleanup_task, CacheConfig, CacheManager};

/// Main entry point for the cache maintenance process.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the shared cache manager and its disk store
/// 4. Start background expiry cleanup task
/// 5. Wait for SIGINT/SIGTERM, then stop the cleanup task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "object_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting object cache maintenance");

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: name={}, expiry={:?}, max_size={}, cleanup_interval={}s",
        config.name, config.expiry, config.max_size, config.cleanup_interval
    );

    let cleanup_interval = config.cleanup_interval;
    let manager = CacheManager::initialise_shared(config)
        .await
        .context("failed to open cache store")?;

    let store = manager.delegate().store();
    let stats = store.stats().await;
    info!(
        path = %store.path().display(),
        entries = stats.total_entries,
        bytes = stats.total_size,
        "Cache store ready"
    );

    let cleanup_handle = spawn_cleanup_task(manager.delegate().clone(), cleanup_interval);
    info!("Background cleanup task started");

    shutdown_signal().await;

    cleanup_handle.abort();
    warn!("Cleanup task aborted");

    let stats = manager.delegate().store().stats().await;
    info!(
        entries = stats.total_entries,
        expirations = stats.expirations,
        evictions = stats.evictions,
        "Shutdown complete: hit rate {:.1}%",
        stats.hit_rate() * 100.0
    );
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
