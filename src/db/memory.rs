//! In-process store, used by tests and when no database is configured.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use super::models::{Heartbeat, NewHeartbeat, NotificationChannel};
use super::{MonitorStore, StoreError};
use crate::service_monitor::models::Monitor;

#[derive(Default)]
pub struct MemoryStore {
    monitors: DashMap<i32, Monitor>,
    heartbeats: DashMap<i32, Vec<Heartbeat>>,
    channels: DashMap<i32, NotificationChannel>,
    // monitor_id -> linked channel ids
    links: DashMap<i32, BTreeSet<i32>>,
    next_heartbeat_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_monitor(&self, monitor: Monitor) {
        self.monitors.insert(monitor.id, monitor);
    }

    pub fn remove_monitor(&self, monitor_id: i32) {
        self.monitors.remove(&monitor_id);
        self.heartbeats.remove(&monitor_id);
        self.links.remove(&monitor_id);
    }

    pub fn upsert_channel(&self, channel: NotificationChannel) {
        self.channels.insert(channel.id, channel);
    }

    pub fn link_channel(&self, monitor_id: i32, channel_id: i32) {
        self.links.entry(monitor_id).or_default().insert(channel_id);
    }

    /// All heartbeats of a monitor in commit order.
    pub fn heartbeats(&self, monitor_id: i32) -> Vec<Heartbeat> {
        self.heartbeats
            .get(&monitor_id)
            .map(|beats| beats.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn create_heartbeat(&self, heartbeat: NewHeartbeat) -> Result<Heartbeat, StoreError> {
        let id = self.next_heartbeat_id.fetch_add(1, Ordering::SeqCst) + 1;
        let heartbeat = heartbeat.into_heartbeat(id);
        self.heartbeats
            .entry(heartbeat.monitor_id)
            .or_default()
            .push(heartbeat.clone());
        Ok(heartbeat)
    }

    async fn latest_heartbeat(&self, monitor_id: i32) -> Result<Option<Heartbeat>, StoreError> {
        Ok(self.heartbeats.get(&monitor_id).and_then(|beats| {
            beats
                .iter()
                .max_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)))
                .cloned()
        }))
    }

    async fn list_active_monitors(&self) -> Result<Vec<Monitor>, StoreError> {
        let mut monitors: Vec<Monitor> = self
            .monitors
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.value().clone())
            .collect();
        monitors.sort_by_key(|m| m.id);
        Ok(monitors)
    }

    async fn get_monitor(&self, monitor_id: i32) -> Result<Option<Monitor>, StoreError> {
        Ok(self.monitors.get(&monitor_id).map(|m| m.clone()))
    }

    async fn find_monitor_by_push_token(
        &self,
        token: &str,
    ) -> Result<Option<Monitor>, StoreError> {
        Ok(self
            .monitors
            .iter()
            .find(|entry| entry.push_token.as_deref() == Some(token))
            .map(|entry| entry.value().clone()))
    }

    async fn linked_notification_channels(
        &self,
        monitor_id: i32,
    ) -> Result<Vec<NotificationChannel>, StoreError> {
        let Some(ids) = self.links.get(&monitor_id).map(|ids| ids.clone()) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.channels.get(id).map(|c| c.clone()))
            .collect())
    }

    async fn default_notification_channels(
        &self,
        user_id: i32,
    ) -> Result<Vec<NotificationChannel>, StoreError> {
        let mut channels: Vec<NotificationChannel> = self
            .channels
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.is_default)
            .map(|entry| entry.value().clone())
            .collect();
        channels.sort_by_key(|c| c.id);
        Ok(channels)
    }

    async fn delete_heartbeats_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for mut entry in self.heartbeats.iter_mut() {
            let before = entry.len();
            entry.retain(|hb| hb.time >= cutoff);
            removed += (before - entry.len()) as u64;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::models::ChannelConfig;
    use crate::service_monitor::models::MonitorStatus;
    use chrono::Duration;

    fn new_heartbeat(monitor_id: i32, time: DateTime<Utc>) -> NewHeartbeat {
        NewHeartbeat {
            monitor_id,
            status: MonitorStatus::Up,
            message: "ok".to_string(),
            ping_ms: 5,
            time,
            important: false,
            duration_seconds: 0,
        }
    }

    fn channel(id: i32, user_id: i32, is_default: bool) -> NotificationChannel {
        NotificationChannel {
            id,
            user_id,
            name: format!("channel-{id}"),
            config: ChannelConfig::Gotify {
                server_url: "http://gotify".to_string(),
                app_token: "t".to_string(),
                priority: None,
            },
            active: true,
            is_default,
        }
    }

    #[tokio::test]
    async fn test_latest_heartbeat_and_retention() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .create_heartbeat(new_heartbeat(1, now - Duration::days(10)))
            .await
            .unwrap();
        let latest = store.create_heartbeat(new_heartbeat(1, now)).await.unwrap();

        assert_eq!(store.latest_heartbeat(1).await.unwrap(), Some(latest));
        assert_eq!(store.latest_heartbeat(2).await.unwrap(), None);

        let removed = store
            .delete_heartbeats_before(now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.heartbeats(1).len(), 1);
    }

    #[tokio::test]
    async fn test_channel_queries() {
        let store = MemoryStore::new();
        store.upsert_channel(channel(1, 7, false));
        store.upsert_channel(channel(2, 7, true));
        store.upsert_channel(channel(3, 8, true));
        store.link_channel(42, 1);

        let linked = store.linked_notification_channels(42).await.unwrap();
        assert_eq!(linked.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1]);

        let defaults = store.default_notification_channels(7).await.unwrap();
        assert_eq!(defaults.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2]);
    }
}
