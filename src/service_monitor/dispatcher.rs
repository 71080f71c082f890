//! Routes a monitor to the probe for its declared type.
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::checkers::http::HttpMode;
use super::checkers::{
    browser, database, docker, finalize, game, grpc, http, message_queue, network, with_timeout,
    CheckError, ProbeResult,
};
use super::models::{CheckResult, GroupConfig, Monitor, MonitorKind, MonitorStatus};
use crate::db::MonitorStore;

pub const WAITING_FOR_PUSH: &str = "Waiting for push";

/// Anything that can turn a monitor into a [`CheckResult`].
///
/// Implementations must never panic and must return within the monitor's timeout.
#[async_trait]
pub trait MonitorChecker: Send + Sync {
    async fn check(&self, monitor: &Monitor) -> CheckResult;
}

pub struct CheckDispatcher {
    store: Arc<dyn MonitorStore>,
}

impl CheckDispatcher {
    pub fn new(store: Arc<dyn MonitorStore>) -> Self {
        Self { store }
    }

    async fn probe(kind: MonitorKind, timeout: Duration) -> ProbeResult {
        match kind {
            MonitorKind::Http(config) => http::check_http(&config, HttpMode::Status, timeout).await,
            MonitorKind::Keyword(config) => http::check_http(&config, HttpMode::Keyword, timeout).await,
            MonitorKind::JsonQuery(config) => {
                http::check_http(&config, HttpMode::JsonQuery, timeout).await
            }
            MonitorKind::GrpcKeyword(config) => grpc::check_grpc(&config, timeout).await,
            MonitorKind::Tcp(config) => network::check_tcp(&config, timeout).await,
            MonitorKind::Ping(config) => network::check_ping(&config, timeout).await,
            MonitorKind::Dns(config) => network::check_dns(&config, timeout).await,
            MonitorKind::Docker(config) => docker::check_docker(&config, timeout).await,
            MonitorKind::Mongodb(config) => database::check_mongodb(&config, timeout).await,
            MonitorKind::Mysql(config) => database::check_mysql(&config, timeout).await,
            MonitorKind::Postgres(config) => database::check_postgres(&config, timeout).await,
            MonitorKind::Sqlserver(config) => database::check_sqlserver(&config, timeout).await,
            MonitorKind::Redis(config) => database::check_redis(&config, timeout).await,
            MonitorKind::Mqtt(config) => message_queue::check_mqtt(&config, timeout).await,
            MonitorKind::Kafka(config) => message_queue::check_kafka(&config, timeout).await,
            MonitorKind::Rabbitmq(config) => message_queue::check_rabbitmq(&config, timeout).await,
            MonitorKind::Steam(config) => game::check_steam(&config, timeout).await,
            MonitorKind::Gamedig(config) => game::check_gamedig(&config, timeout).await,
            MonitorKind::Radius(config) => network::check_radius(&config, timeout).await,
            MonitorKind::TailscalePing(config) => {
                network::check_tailscale_ping(&config, timeout).await
            }
            MonitorKind::RealBrowser(config) => browser::check_browser(&config, timeout).await,
            // handled before probing
            MonitorKind::Push {} | MonitorKind::Group(_) => Err(CheckError::config(
                "Pseudo monitor types have no probe",
            )),
        }
    }

    /// DOWN if any child is DOWN, UP otherwise. PENDING until at least one child has reported.
    pub async fn group_status(&self, config: &GroupConfig) -> CheckResult {
        if config.children_ids.is_empty() {
            return CheckResult::pending("Group has no child monitors");
        }

        let mut reporting = 0usize;
        let mut down = Vec::new();
        for child_id in &config.children_ids {
            match self.store.latest_heartbeat(*child_id).await {
                Ok(Some(heartbeat)) => match heartbeat.status {
                    MonitorStatus::Down => {
                        reporting += 1;
                        down.push(*child_id);
                    }
                    MonitorStatus::Up => reporting += 1,
                    MonitorStatus::Pending | MonitorStatus::Maintenance => {}
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(child_id = child_id, error = %e, "Failed to read child heartbeat.");
                    return CheckResult::down(0, format!("Failed to read child monitor {child_id}: {e}"));
                }
            }
        }

        if !down.is_empty() {
            let ids: Vec<String> = down.iter().map(|id| id.to_string()).collect();
            return CheckResult::down(0, format!("Child monitors down: {}", ids.join(", ")));
        }
        if reporting == 0 {
            return CheckResult::pending("Waiting for child monitors");
        }
        CheckResult::up(0, "All child monitors are up")
    }
}

#[async_trait]
impl MonitorChecker for CheckDispatcher {
    async fn check(&self, monitor: &Monitor) -> CheckResult {
        let started = Instant::now();
        let kind = match monitor.kind() {
            Ok(kind) => kind,
            Err(e) => return finalize(monitor, Err(e.into()), started.elapsed()),
        };

        let timeout = monitor.timeout();
        let result = match kind {
            MonitorKind::Push {} => return CheckResult::pending(WAITING_FOR_PUSH),
            MonitorKind::Group(config) => return self.group_status(&config).await,
            // probes bound their own I/O; the outer bound catches anything that does not
            kind => with_timeout(timeout, Self::probe(kind, timeout)).await,
        };

        let elapsed = started.elapsed();
        debug!(
            monitor_id = monitor.id,
            elapsed_ms = elapsed.as_millis() as u64,
            ok = result.is_ok(),
            "Probe finished."
        );
        finalize(monitor, result, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::NewHeartbeat;
    use chrono::Utc;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn monitor(monitor_type: &str, config: serde_json::Value) -> Monitor {
        Monitor {
            id: 100,
            user_id: 1,
            name: "dispatch".to_string(),
            monitor_type: monitor_type.to_string(),
            active: true,
            interval_seconds: 60,
            timeout_seconds: 2,
            retry_interval_seconds: 1,
            max_retries: 0,
            upside_down: false,
            push_token: None,
            monitor_config: config,
        }
    }

    async fn beat(store: &MemoryStore, monitor_id: i32, status: MonitorStatus) {
        store
            .create_heartbeat(NewHeartbeat {
                monitor_id,
                status,
                message: String::new(),
                ping_ms: 1,
                time: Utc::now(),
                important: false,
                duration_seconds: 0,
            })
            .await
            .unwrap();
    }

    fn dispatcher(store: Arc<MemoryStore>) -> CheckDispatcher {
        CheckDispatcher::new(store)
    }

    #[tokio::test]
    async fn test_push_is_pending_without_io() {
        let d = dispatcher(Arc::new(MemoryStore::new()));
        let result = d.check(&monitor("push", json!({}))).await;
        assert_eq!(result, CheckResult::pending(WAITING_FOR_PUSH));
        assert_eq!(result.ping_ms, 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_down_even_upside_down() {
        let d = dispatcher(Arc::new(MemoryStore::new()));
        let mut m = monitor("carrier-pigeon", json!({}));
        m.upside_down = true;
        let result = d.check(&m).await;
        assert_eq!(result.status, MonitorStatus::Down);
        assert_eq!(result.message, "Unsupported monitor type: carrier-pigeon");
    }

    #[tokio::test]
    async fn test_missing_required_field_is_config_error() {
        let d = dispatcher(Arc::new(MemoryStore::new()));
        let mut m = monitor("tcp", json!({ "port": 80 }));
        m.upside_down = true;
        let result = d.check(&m).await;
        assert_eq!(result.status, MonitorStatus::Down);
        assert_eq!(result.message, "Hostname is required");
    }

    #[tokio::test]
    async fn test_tcp_probe_and_upside_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let d = dispatcher(Arc::new(MemoryStore::new()));

        let mut m = monitor("tcp", json!({ "hostname": "127.0.0.1", "port": port }));
        assert_eq!(d.check(&m).await.status, MonitorStatus::Up);

        m.upside_down = true;
        assert_eq!(d.check(&m).await.status, MonitorStatus::Down);

        drop(listener);
        let refused = d.check(&m).await;
        assert_eq!(refused.status, MonitorStatus::Up);
    }

    #[tokio::test]
    async fn test_group_status() {
        let store = Arc::new(MemoryStore::new());
        let d = dispatcher(store.clone());
        let group = |ids: Vec<i32>| monitor("group", json!({ "childrenIds": ids }));

        let empty = d.check(&group(vec![])).await;
        assert_eq!(empty.status, MonitorStatus::Pending);

        let silent = d.check(&group(vec![1, 2])).await;
        assert_eq!(silent.status, MonitorStatus::Pending);

        beat(&store, 1, MonitorStatus::Up).await;
        beat(&store, 2, MonitorStatus::Pending).await;
        assert_eq!(d.check(&group(vec![1, 2, 3])).await.status, MonitorStatus::Up);

        beat(&store, 3, MonitorStatus::Down).await;
        let down = d.check(&group(vec![1, 2, 3])).await;
        assert_eq!(down.status, MonitorStatus::Down);
        assert_eq!(down.message, "Child monitors down: 3");
    }
}
