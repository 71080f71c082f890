//! Commits check results as heartbeats and reacts to status transitions.
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::models::{CheckResult, Monitor, MonitorStatus};
use crate::db::models::{Heartbeat, NewHeartbeat};
use crate::db::{MonitorStore, StoreError};
use crate::notifications::service::NotificationService;

/// Receives every committed heartbeat for real-time delivery. Must not block.
pub trait HeartbeatPublisher: Send + Sync {
    fn publish(&self, monitor_id: i32, heartbeat: &Heartbeat);
}

/// Publisher that drops everything, for hosts without a real-time surface.
pub struct NoopPublisher;

impl HeartbeatPublisher for NoopPublisher {
    fn publish(&self, _monitor_id: i32, _heartbeat: &Heartbeat) {}
}

#[derive(Debug)]
pub struct RecordOutcome {
    pub heartbeat: Heartbeat,
    pub previous_status: Option<MonitorStatus>,
    /// Present when the heartbeat was a reportable transition and a fan-out was spawned.
    pub notification: Option<JoinHandle<()>>,
}

impl RecordOutcome {
    pub fn is_reportable(&self) -> bool {
        self.notification.is_some()
    }
}

pub struct HeartbeatRecorder {
    store: Arc<dyn MonitorStore>,
    publisher: Arc<dyn HeartbeatPublisher>,
    notifications: Arc<NotificationService>,
    // serializes read-latest + insert per monitor so times stay strictly increasing
    commit_locks: DashMap<i32, Arc<Mutex<()>>>,
}

impl HeartbeatRecorder {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        publisher: Arc<dyn HeartbeatPublisher>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            store,
            publisher,
            notifications,
            commit_locks: DashMap::new(),
        }
    }

    fn commit_lock(&self, monitor_id: i32) -> Arc<Mutex<()>> {
        self.commit_locks
            .entry(monitor_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persists `result`, publishes it, and spawns the notification fan-out on a
    /// reportable transition. The heartbeat is stored before anything else happens.
    pub async fn record(
        &self,
        monitor: &Monitor,
        result: CheckResult,
    ) -> Result<RecordOutcome, StoreError> {
        let lock = self.commit_lock(monitor.id);
        let guard = lock.lock().await;

        let previous = self.store.latest_heartbeat(monitor.id).await?;
        let mut time = Utc::now();
        let (important, duration_seconds) = match &previous {
            Some(prev) => {
                if time <= prev.time {
                    time = prev.time + ChronoDuration::milliseconds(1);
                }
                (
                    prev.status != result.status,
                    (time - prev.time).num_seconds(),
                )
            }
            None => (true, 0),
        };

        if let Some(tls) = &result.tls_info {
            debug!(
                monitor_id = monitor.id,
                days_remaining = tls.days_remaining,
                valid = tls.valid,
                "TLS certificate info collected."
            );
        }

        let heartbeat = self
            .store
            .create_heartbeat(NewHeartbeat {
                monitor_id: monitor.id,
                status: result.status,
                message: result.message,
                ping_ms: result.ping_ms.min(i64::MAX as u64) as i64,
                time,
                important,
                duration_seconds,
            })
            .await?;
        drop(guard);
        // only the map and `lock` left means nobody is waiting on this monitor
        self.commit_locks
            .remove_if(&monitor.id, |_, entry| Arc::strong_count(entry) <= 2);
        drop(lock);

        self.publisher.publish(monitor.id, &heartbeat);

        let previous_status = previous.map(|p| p.status);
        let notification = match previous_status {
            Some(prev_status) if important => {
                info!(
                    monitor_id = monitor.id,
                    from = %prev_status,
                    to = %heartbeat.status,
                    "Monitor status changed."
                );
                Some(self.spawn_fanout(monitor.clone(), heartbeat.clone(), prev_status))
            }
            _ => None,
        };

        Ok(RecordOutcome {
            heartbeat,
            previous_status,
            notification,
        })
    }

    fn spawn_fanout(
        &self,
        monitor: Monitor,
        heartbeat: Heartbeat,
        previous_status: MonitorStatus,
    ) -> JoinHandle<()> {
        let notifications = self.notifications.clone();
        tokio::spawn(async move {
            match notifications
                .dispatch(&monitor, &heartbeat, Some(previous_status))
                .await
            {
                Ok(report) => debug!(
                    monitor_id = monitor.id,
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    "Notification fan-out finished."
                ),
                Err(e) => error!(
                    monitor_id = monitor.id,
                    error = %e,
                    "Notification fan-out failed."
                ),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::notifications::senders::SenderRegistry;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingPublisher {
        seen: StdMutex<Vec<(i32, i64)>>,
    }

    impl HeartbeatPublisher for CollectingPublisher {
        fn publish(&self, monitor_id: i32, heartbeat: &Heartbeat) {
            self.seen.lock().unwrap().push((monitor_id, heartbeat.id));
        }
    }

    fn monitor() -> Monitor {
        Monitor {
            id: 7,
            user_id: 1,
            name: "api".to_string(),
            monitor_type: "http".to_string(),
            active: true,
            interval_seconds: 60,
            timeout_seconds: 5,
            retry_interval_seconds: 10,
            max_retries: 0,
            upside_down: false,
            push_token: None,
            monitor_config: json!({ "url": "http://localhost" }),
        }
    }

    fn recorder(store: Arc<MemoryStore>, publisher: Arc<CollectingPublisher>) -> HeartbeatRecorder {
        let notifications = Arc::new(NotificationService::new(
            store.clone(),
            SenderRegistry::new(Duration::from_secs(1)).unwrap(),
        ));
        HeartbeatRecorder::new(store, publisher, notifications)
    }

    #[tokio::test]
    async fn test_important_and_reportable_flags() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(CollectingPublisher::default());
        let recorder = recorder(store.clone(), publisher.clone());
        let m = monitor();

        let first = recorder.record(&m, CheckResult::up(10, "ok")).await.unwrap();
        assert!(first.heartbeat.important);
        assert_eq!(first.heartbeat.duration_seconds, 0);
        assert!(!first.is_reportable());

        let same = recorder.record(&m, CheckResult::up(12, "ok")).await.unwrap();
        assert!(!same.heartbeat.important);
        assert!(!same.is_reportable());

        let changed = recorder.record(&m, CheckResult::down(3, "boom")).await.unwrap();
        assert!(changed.heartbeat.important);
        assert_eq!(changed.previous_status, Some(MonitorStatus::Up));
        assert!(changed.is_reportable());
        changed.notification.unwrap().await.unwrap();

        assert_eq!(publisher.seen.lock().unwrap().len(), 3);
        assert_eq!(store.heartbeats(7).len(), 3);
    }

    #[tokio::test]
    async fn test_times_strictly_increase_despite_future_previous() {
        let store = Arc::new(MemoryStore::new());
        let future = Utc::now() + ChronoDuration::seconds(30);
        store
            .create_heartbeat(NewHeartbeat {
                monitor_id: 7,
                status: MonitorStatus::Up,
                message: String::new(),
                ping_ms: 0,
                time: future,
                important: true,
                duration_seconds: 0,
            })
            .await
            .unwrap();

        let recorder = recorder(store.clone(), Arc::new(CollectingPublisher::default()));
        let outcome = recorder.record(&monitor(), CheckResult::up(1, "ok")).await.unwrap();
        assert_eq!(outcome.heartbeat.time, future + ChronoDuration::milliseconds(1));
        assert_eq!(outcome.heartbeat.duration_seconds, 0);
    }

    #[tokio::test]
    async fn test_commit_locks_do_not_accumulate() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(recorder(store.clone(), Arc::new(CollectingPublisher::default())));

        let mut tasks = Vec::new();
        for id in 1..=20 {
            let recorder = recorder.clone();
            tasks.push(tokio::spawn(async move {
                let mut m = monitor();
                m.id = id;
                recorder.record(&m, CheckResult::up(1, "ok")).await.unwrap();
                recorder.record(&m, CheckResult::up(1, "ok")).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(recorder.commit_locks.is_empty());
        assert_eq!(store.heartbeats(20).len(), 2);
    }
}
