//! Persistence seam for the monitoring engine.
//!
//! The scheduler, recorder and notification fan-out only ever talk to a
//! [`MonitorStore`]; the host decides whether that is PostgreSQL or the
//! in-process store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::notifications::encryption::EncryptionError;
use crate::notifications::service::merge_channels;
use crate::service_monitor::models::Monitor;

pub mod memory;
pub mod models;
pub mod postgres;

use models::{Heartbeat, NewHeartbeat, NotificationChannel};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Encryption error: {0}")]
    EncryptionError(#[from] EncryptionError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn create_heartbeat(&self, heartbeat: NewHeartbeat) -> Result<Heartbeat, StoreError>;

    async fn latest_heartbeat(&self, monitor_id: i32) -> Result<Option<Heartbeat>, StoreError>;

    async fn list_active_monitors(&self) -> Result<Vec<Monitor>, StoreError>;

    async fn get_monitor(&self, monitor_id: i32) -> Result<Option<Monitor>, StoreError>;

    async fn find_monitor_by_push_token(&self, token: &str)
        -> Result<Option<Monitor>, StoreError>;

    /// Channels explicitly linked to the monitor, active or not.
    async fn linked_notification_channels(
        &self,
        monitor_id: i32,
    ) -> Result<Vec<NotificationChannel>, StoreError>;

    /// Channels the account marked as default, active or not.
    async fn default_notification_channels(
        &self,
        user_id: i32,
    ) -> Result<Vec<NotificationChannel>, StoreError>;

    /// Channels that should hear about the monitor's transitions: the linked
    /// ones plus the account defaults, active only and without duplicates.
    async fn resolve_notification_channels(
        &self,
        monitor_id: i32,
    ) -> Result<Vec<NotificationChannel>, StoreError> {
        let Some(monitor) = self.get_monitor(monitor_id).await? else {
            return Ok(Vec::new());
        };
        let linked = self.linked_notification_channels(monitor_id).await?;
        let defaults = self.default_notification_channels(monitor.user_id).await?;
        Ok(merge_channels(linked, defaults))
    }

    /// Bulk retention delete. Returns the number of removed heartbeats.
    async fn delete_heartbeats_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
