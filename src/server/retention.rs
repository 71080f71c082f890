//! Periodic deletion of old heartbeats.
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

use crate::db::{MonitorStore, StoreError};

pub const RETENTION_PERIOD: Duration = Duration::from_secs(3600);

/// Deletes heartbeats older than `retention_days`. Returns the number removed.
pub async fn prune_heartbeats(store: &dyn MonitorStore, retention_days: u32) -> Result<u64, StoreError> {
    let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
    let removed = store.delete_heartbeats_before(cutoff).await?;
    if removed > 0 {
        info!(removed = removed, cutoff = %cutoff, "Pruned old heartbeats.");
    }
    Ok(removed)
}

/// Runs [`prune_heartbeats`] every `period` until `shutdown_rx` fires.
pub async fn run_retention_task(
    store: Arc<dyn MonitorStore>,
    retention_days: u32,
    period: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    if retention_days == 0 {
        info!("Heartbeat retention disabled.");
        return;
    }
    let mut interval = interval(period);
    info!(retention_days = retention_days, "Heartbeat retention task started.");
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            _ = interval.tick() => {
                if let Err(e) = prune_heartbeats(store.as_ref(), retention_days).await {
                    error!(error = %e, "Failed to prune heartbeats.");
                }
            }
        }
    }
    info!("Heartbeat retention task stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::NewHeartbeat;
    use crate::service_monitor::models::MonitorStatus;

    async fn beat(store: &MemoryStore, age_days: i64) {
        store
            .create_heartbeat(NewHeartbeat {
                monitor_id: 1,
                status: MonitorStatus::Up,
                message: String::new(),
                ping_ms: 1,
                time: Utc::now() - ChronoDuration::days(age_days),
                important: false,
                duration_seconds: 0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_prune_keeps_recent() {
        let store = MemoryStore::new();
        beat(&store, 200).await;
        beat(&store, 100).await;
        beat(&store, 0).await;

        assert_eq!(prune_heartbeats(&store, 180).await.unwrap(), 1);
        assert_eq!(store.heartbeats(1).len(), 2);
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let store: Arc<dyn MonitorStore> = Arc::new(MemoryStore::new());
        let (tx, rx) = watch::channel(());
        let task = tokio::spawn(run_retention_task(store, 30, Duration::from_secs(3600), rx));
        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
