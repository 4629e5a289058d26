//! Periodic expiry sweep background task.
//!
//! One task per engine. Every `sweep_interval` it purges expired keys,
//! lapsed grants and stale lockouts, then flushes the snapshot if state
//! changed. On shutdown it runs a final flush.

use crate::engine::AccessEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its final flush.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the sweeper on the current tokio runtime, ticking at the engine's
/// configured `sweep_interval`.
///
/// # Panics
/// Panics if called outside a tokio runtime.
pub fn spawn_sweeper(engine: Arc<AccessEngine>) -> SweeperHandle {
    let period = engine.config().sweep_interval;
    spawn_sweeper_every(engine, period)
}

/// Spawn the sweeper with an explicit period (at least one millisecond).
pub fn spawn_sweeper_every(engine: Arc<AccessEngine>, period: Duration) -> SweeperHandle {
    let period = period.max(Duration::from_millis(1));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately, we don't want that
        interval.tick().await;

        info!(period_ms = period.as_millis() as u64, "Sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = engine.sweep();
                    if report.total() > 0 {
                        debug!(purged = report.total(), "Sweeper purged expired entries");
                    }
                    flush(&engine).await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        flush(&engine).await;
        info!("Sweeper stopped");
    });

    SweeperHandle { shutdown_tx, task }
}

async fn flush(engine: &Arc<AccessEngine>) {
    let engine = Arc::clone(engine);
    match tokio::task::spawn_blocking(move || engine.flush()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "Snapshot flush failed"),
        Err(e) => warn!(error = %e, "Snapshot flush task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::AccessConfig;
    use crate::keys::KeySpec;
    use crate::registry::UserId;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    const OWNER: UserId = UserId::new(1);

    #[tokio::test]
    async fn test_sweeper_purges_expired_keys() {
        let clock = Arc::new(MockClock::new(
            Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
        ));
        let engine = Arc::new(
            AccessEngine::with_clock(AccessConfig::new(OWNER), clock.clone()).unwrap(),
        );
        engine
            .issue_key(OWNER, KeySpec::single_use(chrono::Duration::minutes(1)))
            .unwrap();

        let handle = spawn_sweeper_every(engine.clone(), Duration::from_millis(10));
        clock.advance(chrono::Duration::minutes(2));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(engine.list_keys(OWNER).unwrap().is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        let mut config = AccessConfig::new(OWNER);
        config.snapshot_path = Some(path.clone());

        let engine = Arc::new(AccessEngine::new(config).unwrap());
        let handle = spawn_sweeper_every(engine.clone(), Duration::from_secs(3600));

        engine.grant_access(OWNER, UserId::new(5), None).unwrap();
        handle.shutdown().await;

        assert!(path.exists());
        assert!(!engine.is_dirty());
    }

    #[tokio::test]
    async fn test_spawn_uses_configured_interval() {
        let engine = Arc::new(AccessEngine::new(AccessConfig::new(OWNER)).unwrap());
        let handle = spawn_sweeper(engine);
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
