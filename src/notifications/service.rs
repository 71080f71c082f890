use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use super::models::NotificationMessage;
use super::senders::{SenderError, SenderRegistry};
use crate::db::models::{Heartbeat, NotificationChannel};
use crate::db::{MonitorStore, StoreError};
use crate::service_monitor::models::{Monitor, MonitorStatus};

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Sender error: {0}")]
    SenderError(#[from] SenderError),
}

/// Outcome of one fan-out, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: Vec<i32>,
    pub failed: Vec<i32>,
}

/// Linked channels first, then defaults not already linked. Inactive channels are dropped.
pub fn merge_channels(
    linked: Vec<NotificationChannel>,
    defaults: Vec<NotificationChannel>,
) -> Vec<NotificationChannel> {
    let mut seen = HashSet::new();
    linked
        .into_iter()
        .chain(defaults)
        .filter(|channel| channel.active)
        .filter(|channel| seen.insert(channel.id))
        .collect()
}

pub struct NotificationService {
    store: Arc<dyn MonitorStore>,
    senders: SenderRegistry,
}

impl NotificationService {
    pub fn new(store: Arc<dyn MonitorStore>, senders: SenderRegistry) -> Self {
        Self { store, senders }
    }

    /// Delivers a status change to every channel interested in the monitor.
    /// Channels are contacted concurrently and a failing channel never affects the others.
    pub async fn dispatch(
        &self,
        monitor: &Monitor,
        heartbeat: &Heartbeat,
        previous_status: Option<MonitorStatus>,
    ) -> Result<FanoutReport, NotificationError> {
        let channels = self.store.resolve_notification_channels(monitor.id).await?;
        if channels.is_empty() {
            debug!(monitor_id = monitor.id, "No notification channels to notify.");
            return Ok(FanoutReport::default());
        }

        let message = &NotificationMessage::for_heartbeat(monitor, heartbeat, previous_status);
        let deliveries = channels.iter().map(|channel| async move {
            let result = self.send_to_channel(channel, message).await;
            (channel, result)
        });

        let mut report = FanoutReport::default();
        for (channel, result) in join_all(deliveries).await {
            match result {
                Ok(()) => {
                    info!(
                        monitor_id = monitor.id,
                        channel_id = channel.id,
                        channel_type = channel.config.channel_type(),
                        "Notification delivered."
                    );
                    report.delivered.push(channel.id);
                }
                Err(e) => {
                    error!(
                        monitor_id = monitor.id,
                        channel_id = channel.id,
                        channel_name = %channel.name,
                        channel_type = channel.config.channel_type(),
                        error = %e,
                        "Failed to deliver notification."
                    );
                    report.failed.push(channel.id);
                }
            }
        }
        Ok(report)
    }

    /// Sends one message to one channel, regardless of its `active` flag.
    pub async fn send_to_channel(
        &self,
        channel: &NotificationChannel,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        self.senders.send(&channel.config, message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::notifications::models::ChannelConfig;
    use crate::notifications::senders::ProviderEndpoints;
    use chrono::Utc;
    use reqwest::Client;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn webhook_channel(id: i32, user_id: i32, url: String, active: bool, is_default: bool) -> NotificationChannel {
        NotificationChannel {
            id,
            user_id,
            name: format!("hook-{id}"),
            config: ChannelConfig::Webhook {
                url,
                method: None,
                headers: None,
                body_template: None,
            },
            active,
            is_default,
        }
    }

    fn monitor() -> Monitor {
        Monitor {
            id: 1,
            user_id: 10,
            name: "API".to_string(),
            monitor_type: "http".to_string(),
            active: true,
            interval_seconds: 60,
            timeout_seconds: 5,
            retry_interval_seconds: 10,
            max_retries: 0,
            upside_down: false,
            push_token: None,
            monitor_config: json!({ "url": "https://api.example.com" }),
        }
    }

    fn heartbeat() -> Heartbeat {
        Heartbeat {
            id: 2,
            monitor_id: 1,
            status: MonitorStatus::Down,
            message: "HTTP 500 - Internal Server Error".to_string(),
            ping_ms: 30,
            time: Utc::now(),
            important: true,
            duration_seconds: 60,
        }
    }

    #[test]
    fn test_merge_channels_dedups_and_filters_inactive() {
        let linked = vec![
            webhook_channel(1, 10, "a".into(), true, false),
            webhook_channel(2, 10, "b".into(), false, false),
            webhook_channel(3, 10, "c".into(), true, true),
        ];
        let defaults = vec![
            webhook_channel(3, 10, "c".into(), true, true),
            webhook_channel(4, 10, "d".into(), true, true),
            webhook_channel(5, 10, "e".into(), false, true),
        ];

        let ids: Vec<i32> = merge_channels(linked, defaults).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_dispatch_isolates_failing_channels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.upsert_monitor(monitor());
        store.upsert_channel(webhook_channel(1, 10, format!("{}/ok", server.uri()), true, false));
        store.upsert_channel(webhook_channel(2, 10, format!("{}/broken", server.uri()), true, false));
        store.upsert_channel(webhook_channel(3, 10, format!("{}/ok", server.uri()), true, true));
        // another account's default is never used
        store.upsert_channel(webhook_channel(4, 99, format!("{}/ok", server.uri()), true, true));
        store.link_channel(1, 1);
        store.link_channel(1, 2);

        let senders = SenderRegistry::with_endpoints(
            Client::new(),
            ProviderEndpoints::default(),
            Duration::from_secs(5),
        );
        let service = NotificationService::new(store, senders);

        let report = service
            .dispatch(&monitor(), &heartbeat(), Some(MonitorStatus::Up))
            .await
            .unwrap();
        assert_eq!(report.delivered, vec![1, 3]);
        assert_eq!(report.failed, vec![2]);
    }

    #[tokio::test]
    async fn test_dispatch_without_channels() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_monitor(monitor());
        let senders = SenderRegistry::new(Duration::from_secs(1)).unwrap();
        let service = NotificationService::new(store, senders);

        let report = service.dispatch(&monitor(), &heartbeat(), None).await.unwrap();
        assert_eq!(report, FanoutReport::default());
    }
}
