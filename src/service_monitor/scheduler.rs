//! One timer task per active monitor, driving check → retry → commit cycles.
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::dispatcher::MonitorChecker;
use super::models::{CheckResult, Monitor, MonitorStatus};
use super::recorder::HeartbeatRecorder;
use crate::db::{MonitorStore, StoreError};

struct MonitorTask {
    handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub active_timer_count: usize,
    pub monitor_ids: Vec<i32>,
}

pub struct MonitorScheduler {
    store: Arc<dyn MonitorStore>,
    checker: Arc<dyn MonitorChecker>,
    recorder: Arc<HeartbeatRecorder>,
    // A map from monitor_id to its running task handle and shutdown sender.
    running_tasks: Mutex<HashMap<i32, MonitorTask>>,
    // Held for the whole of a cycle; a restarted timer waits for the old cycle to finish.
    cycle_locks: DashMap<i32, Arc<Mutex<()>>>,
}

impl MonitorScheduler {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        checker: Arc<dyn MonitorChecker>,
        recorder: Arc<HeartbeatRecorder>,
    ) -> Self {
        Self {
            store,
            checker,
            recorder,
            running_tasks: Mutex::new(HashMap::new()),
            cycle_locks: DashMap::new(),
        }
    }

    /// (Re)starts the timer for `monitor`. Inactive and push monitors are only stopped.
    /// Returns whether a timer is running afterwards.
    pub async fn start(&self, monitor: Monitor) -> bool {
        let mut running = self.running_tasks.lock().await;
        if let Some(task) = running.remove(&monitor.id) {
            debug!(monitor_id = monitor.id, "Replacing existing timer.");
            signal_stop(monitor.id, task);
        }

        if !monitor.active {
            debug!(monitor_id = monitor.id, "Monitor is inactive, not scheduling.");
            self.prune_cycle_locks(&running);
            return false;
        }
        if monitor.is_push() {
            debug!(monitor_id = monitor.id, "Push monitor, waiting for inbound heartbeats.");
            self.prune_cycle_locks(&running);
            return false;
        }

        info!(
            monitor_id = monitor.id,
            monitor_type = %monitor.monitor_type,
            interval_secs = monitor.interval().as_secs(),
            "Starting monitor timer."
        );
        let monitor_id = monitor.id;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let cycle_lock = self
            .cycle_locks
            .entry(monitor_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let handle = tokio::spawn(run_monitor_loop(
            monitor,
            self.checker.clone(),
            self.recorder.clone(),
            cycle_lock,
            shutdown_rx,
        ));
        running.insert(
            monitor_id,
            MonitorTask {
                handle,
                shutdown_tx,
            },
        );
        true
    }

    /// Cancels the timer for `monitor_id`. An in-flight cycle still commits its result.
    pub async fn stop(&self, monitor_id: i32) -> bool {
        let mut running = self.running_tasks.lock().await;
        let task = running.remove(&monitor_id);
        self.prune_cycle_locks(&running);
        match task {
            Some(task) => {
                info!(monitor_id = monitor_id, "Stopping monitor timer.");
                signal_stop(monitor_id, task);
                true
            }
            None => false,
        }
    }

    /// Drops cycle locks that no timer and no in-flight cycle still holds.
    /// Must be called with the registry locked so `start` cannot clone an entry meanwhile.
    fn prune_cycle_locks(&self, running: &HashMap<i32, MonitorTask>) {
        self.cycle_locks
            .retain(|id, lock| running.contains_key(id) || Arc::strong_count(lock) > 1);
    }

    /// Starts a timer for every active monitor in the store.
    pub async fn initialize_all(&self) -> Result<usize, StoreError> {
        let monitors = self.store.list_active_monitors().await?;
        let mut started = 0;
        for monitor in monitors {
            if self.start(monitor).await {
                started += 1;
            }
        }
        info!(started = started, "Monitor timers initialized.");
        Ok(started)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let running = self.running_tasks.lock().await;
        let mut monitor_ids: Vec<i32> = running.keys().copied().collect();
        monitor_ids.sort_unstable();
        SchedulerStatus {
            active_timer_count: monitor_ids.len(),
            monitor_ids,
        }
    }

    /// Stops every timer and waits for the tasks, including in-flight cycles, to end.
    pub async fn shutdown(&self) {
        let tasks: Vec<(i32, MonitorTask)> = self.running_tasks.lock().await.drain().collect();
        info!(count = tasks.len(), "Shutting down monitor timers.");
        let mut handles = Vec::with_capacity(tasks.len());
        for (monitor_id, task) in tasks {
            if task.shutdown_tx.send(()).is_err() {
                warn!(monitor_id = monitor_id, "Monitor task already finished before shutdown.");
            }
            handles.push((monitor_id, task.handle));
        }
        for (monitor_id, handle) in handles {
            if let Err(e) = handle.await {
                error!(monitor_id = monitor_id, error = %e, "Monitor task ended abnormally.");
            }
        }
        info!("All monitor timers stopped.");
    }
}

fn signal_stop(monitor_id: i32, task: MonitorTask) {
    if task.shutdown_tx.send(()).is_err() {
        warn!(
            monitor_id = monitor_id,
            "Failed to send shutdown signal to monitor task; it might have already finished."
        );
    }
    // the task is left to finish its current cycle on its own
    drop(task.handle);
}

async fn run_monitor_loop(
    monitor: Monitor,
    checker: Arc<dyn MonitorChecker>,
    recorder: Arc<HeartbeatRecorder>,
    cycle_lock: Arc<Mutex<()>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    // first tick completes immediately
    let mut interval = tokio::time::interval(monitor.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!(monitor_id = monitor.id, "Monitor timer received shutdown signal.");
                break;
            }

            _ = interval.tick() => {
                let _cycle = cycle_lock.lock().await;
                let result = run_check_with_retries(checker.as_ref(), &monitor).await;
                if let Err(e) = recorder.record(&monitor, result).await {
                    error!(
                        monitor_id = monitor.id,
                        error = %e,
                        "Failed to record heartbeat; continuing with the next tick."
                    );
                }
            }
        }
    }
    debug!(monitor_id = monitor.id, "Monitor timer finished.");
}

/// Runs up to `max_retries + 1` attempts, stopping at the first UP.
/// Only the last attempt is returned; earlier ones are only logged.
pub async fn run_check_with_retries(checker: &dyn MonitorChecker, monitor: &Monitor) -> CheckResult {
    let max_retries = monitor.max_retries();
    let mut attempt = 0u32;
    loop {
        let result = checker.check(monitor).await;
        if result.status == MonitorStatus::Up || attempt >= max_retries {
            return result;
        }
        attempt += 1;
        debug!(
            monitor_id = monitor.id,
            attempt = attempt,
            max_retries = max_retries,
            status = %result.status,
            message = %result.message,
            "Check did not succeed, retrying."
        );
        tokio::time::sleep(monitor.retry_interval()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct Scripted {
        results: StdMutex<VecDeque<MonitorStatus>>,
        calls: StdMutex<u32>,
    }

    impl Scripted {
        fn new(statuses: &[MonitorStatus]) -> Self {
            Self {
                results: StdMutex::new(statuses.iter().copied().collect()),
                calls: StdMutex::new(0),
            }
        }
    }

    #[async_trait]
    impl MonitorChecker for Scripted {
        async fn check(&self, _monitor: &Monitor) -> CheckResult {
            *self.calls.lock().unwrap() += 1;
            let status = self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(MonitorStatus::Down);
            CheckResult::new(status, 1, status.as_str())
        }
    }

    fn monitor(max_retries: i32) -> Monitor {
        Monitor {
            id: 1,
            user_id: 1,
            name: "retry".to_string(),
            monitor_type: "http".to_string(),
            active: true,
            interval_seconds: 60,
            timeout_seconds: 5,
            retry_interval_seconds: 10,
            max_retries,
            upside_down: false,
            push_token: None,
            monitor_config: json!({}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_exhausted() {
        let checker = Scripted::new(&[]);
        let result = run_check_with_retries(&checker, &monitor(3)).await;
        assert_eq!(result.status, MonitorStatus::Down);
        assert_eq!(*checker.calls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_up_stops_retrying() {
        let checker = Scripted::new(&[MonitorStatus::Up]);
        let result = run_check_with_retries(&checker, &monitor(3)).await;
        assert_eq!(result.status, MonitorStatus::Up);
        assert_eq!(*checker.calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_between_attempts() {
        let checker = Scripted::new(&[MonitorStatus::Down, MonitorStatus::Down, MonitorStatus::Up]);
        let started = tokio::time::Instant::now();
        let result = run_check_with_retries(&checker, &monitor(2)).await;
        assert_eq!(result.status, MonitorStatus::Up);
        assert_eq!(started.elapsed(), std::time::Duration::from_secs(20));
    }

    fn scheduler() -> MonitorScheduler {
        use crate::db::memory::MemoryStore;
        use crate::notifications::senders::SenderRegistry;
        use crate::notifications::service::NotificationService;
        use crate::service_monitor::recorder::NoopPublisher;

        let store = Arc::new(MemoryStore::new());
        let notifications = Arc::new(NotificationService::new(
            store.clone(),
            SenderRegistry::new(std::time::Duration::from_secs(1)).unwrap(),
        ));
        let recorder = Arc::new(HeartbeatRecorder::new(
            store.clone(),
            Arc::new(NoopPublisher),
            notifications,
        ));
        MonitorScheduler::new(store, Arc::new(Scripted::new(&[MonitorStatus::Up; 4])), recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_locks_released_for_stopped_monitors() {
        let scheduler = scheduler();
        let mut second = monitor(0);
        second.id = 2;
        scheduler.start(monitor(0)).await;
        scheduler.start(second).await;
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(scheduler.cycle_locks.len(), 2);

        scheduler.stop(1).await;
        // let the stopped task observe its shutdown signal and exit
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(!scheduler.stop(1).await);
        assert_eq!(scheduler.cycle_locks.len(), 1);
        assert!(scheduler.cycle_locks.contains_key(&2));

        let mut inactive = monitor(0);
        inactive.id = 2;
        inactive.active = false;
        scheduler.start(inactive).await;
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        scheduler.stop(3).await;
        assert!(scheduler.cycle_locks.is_empty());
    }
}
