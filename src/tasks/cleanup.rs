//! Expiry Cleanup Task
//!
//! Background task that periodically drops expired entries from the disk
//! store, so stale files do not wait for a read to be removed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::delegate::CacheDelegate;

/// Spawns a background task that purges expired entries every
/// `cleanup_interval_secs` seconds.
///
/// # Arguments
/// * `delegate` - shared delegate whose store is swept
/// * `cleanup_interval_secs` - interval in seconds between sweeps (at least 1)
///
/// # Returns
/// A JoinHandle for the spawned task; abort it on shutdown.
pub fn spawn_cleanup_task(delegate: Arc<CacheDelegate>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            match delegate.store().purge_expired().await {
                Ok(0) => debug!("Expiry cleanup: no expired entries found"),
                Ok(removed) => info!("Expiry cleanup: removed {} expired entries", removed),
                Err(e) => warn!(error = %e, "Expiry cleanup failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, Expiry};
    use chrono::Utc;
    use tempfile::TempDir;

    async fn delegate(dir: &TempDir) -> Arc<CacheDelegate> {
        let config = CacheConfig::new("cleanup").with_directory(dir.path());
        Arc::new(CacheDelegate::open(&config).await.unwrap())
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let dir = TempDir::new().unwrap();
        let delegate = delegate(&dir).await;

        let past = Utc::now() - chrono::Duration::seconds(5);
        delegate
            .store_single_with_expiry(&1i64, "expired", Some(Expiry::Date(past)))
            .await;
        assert_eq!(delegate.store().len().await, 1);

        let handle = spawn_cleanup_task(delegate.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(delegate.store().len().await, 0);
        assert_eq!(delegate.store().stats().await.expirations, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let dir = TempDir::new().unwrap();
        let delegate = delegate(&dir).await;

        delegate
            .store_single_with_expiry(&1i64, "long_lived", Some(Expiry::Seconds(3600)))
            .await;
        delegate.store_single(&2i64, "forever").await;

        let handle = spawn_cleanup_task(delegate.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let kept: i64 = delegate.load_single("long_lived").await.unwrap();
        assert_eq!(kept, 1);
        assert!(delegate.store().contains("forever").await);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_cleanup_task(delegate(&dir).await, 1);

        handle.abort();
        let result = handle.await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
