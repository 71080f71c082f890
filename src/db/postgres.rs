//! PostgreSQL-backed store.
//!
//! Queries are checked at runtime (`sqlx::query_as`) so the crate builds
//! without a live database. Notification channel configs are stored
//! encrypted and decrypted on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{
    Heartbeat, HeartbeatRow, NewHeartbeat, NotificationChannel, NotificationChannelRow,
};
use super::{MonitorStore, StoreError};
use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::ChannelConfig;
use crate::service_monitor::models::Monitor;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS monitors (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        monitor_type TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        interval_seconds INTEGER NOT NULL DEFAULT 60,
        timeout_seconds INTEGER NOT NULL DEFAULT 48,
        retry_interval_seconds INTEGER NOT NULL DEFAULT 60,
        max_retries INTEGER NOT NULL DEFAULT 0,
        upside_down BOOLEAN NOT NULL DEFAULT FALSE,
        push_token TEXT UNIQUE,
        monitor_config JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS heartbeats (
        id BIGSERIAL PRIMARY KEY,
        monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
        status SMALLINT NOT NULL,
        message TEXT NOT NULL DEFAULT '',
        ping_ms BIGINT NOT NULL DEFAULT 0,
        time TIMESTAMPTZ NOT NULL,
        important BOOLEAN NOT NULL DEFAULT FALSE,
        duration_seconds BIGINT NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_heartbeats_monitor_time ON heartbeats (monitor_id, time DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS notification_channels (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        channel_type TEXT NOT NULL,
        config BYTEA NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        is_default BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS monitor_notification_channels (
        monitor_id INTEGER NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
        channel_id INTEGER NOT NULL REFERENCES notification_channels(id) ON DELETE CASCADE,
        PRIMARY KEY (monitor_id, channel_id)
    )
    "#,
];

const MONITOR_COLUMNS: &str = "id, user_id, name, monitor_type, active, interval_seconds, \
     timeout_seconds, retry_interval_seconds, max_retries, upside_down, push_token, monitor_config";

const CHANNEL_COLUMNS: &str = "c.id, c.user_id, c.name, c.channel_type, c.config, c.active, c.is_default";

pub struct PgStore {
    db_pool: PgPool,
    encryption_service: Arc<EncryptionService>,
}

impl PgStore {
    pub fn new(db_pool: PgPool, encryption_service: Arc<EncryptionService>) -> Self {
        Self {
            db_pool,
            encryption_service,
        }
    }

    pub async fn connect(
        database_url: &str,
        encryption_service: Arc<EncryptionService>,
    ) -> Result<Self, StoreError> {
        let db_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(db_pool, encryption_service))
    }

    /// Creates the engine's tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db_pool).await?;
        }
        info!("Database schema is up to date.");
        Ok(())
    }

    fn decode_channels(&self, rows: Vec<NotificationChannelRow>) -> Vec<NotificationChannel> {
        rows.into_iter()
            .filter_map(|row| match self.decode_channel(&row) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!(channel_id = row.id, error = %e, "Skipping notification channel with undecodable config.");
                    None
                }
            })
            .collect()
    }

    fn decode_channel(&self, row: &NotificationChannelRow) -> Result<NotificationChannel, StoreError> {
        let decrypted_config_bytes = self.encryption_service.decrypt(&row.config)?;
        let config: ChannelConfig = serde_json::from_slice(&decrypted_config_bytes)?;
        Ok(NotificationChannel {
            id: row.id,
            user_id: row.user_id,
            name: row.name.clone(),
            config,
            active: row.active,
            is_default: row.is_default,
        })
    }
}

#[async_trait]
impl MonitorStore for PgStore {
    async fn create_heartbeat(&self, heartbeat: NewHeartbeat) -> Result<Heartbeat, StoreError> {
        let row = sqlx::query_as::<_, HeartbeatRow>(
            "INSERT INTO heartbeats (monitor_id, status, message, ping_ms, time, important, duration_seconds) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, monitor_id, status, message, ping_ms, time, important, duration_seconds",
        )
        .bind(heartbeat.monitor_id)
        .bind(i16::from(heartbeat.status))
        .bind(&heartbeat.message)
        .bind(heartbeat.ping_ms)
        .bind(heartbeat.time)
        .bind(heartbeat.important)
        .bind(heartbeat.duration_seconds)
        .fetch_one(&self.db_pool)
        .await?;

        Heartbeat::try_from(row).map_err(StoreError::InvalidData)
    }

    async fn latest_heartbeat(&self, monitor_id: i32) -> Result<Option<Heartbeat>, StoreError> {
        let row = sqlx::query_as::<_, HeartbeatRow>(
            "SELECT id, monitor_id, status, message, ping_ms, time, important, duration_seconds \
             FROM heartbeats WHERE monitor_id = $1 ORDER BY time DESC, id DESC LIMIT 1",
        )
        .bind(monitor_id)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(Heartbeat::try_from)
            .transpose()
            .map_err(StoreError::InvalidData)
    }

    async fn list_active_monitors(&self) -> Result<Vec<Monitor>, StoreError> {
        let monitors = sqlx::query_as::<_, Monitor>(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE active = TRUE ORDER BY id"
        ))
        .fetch_all(&self.db_pool)
        .await?;
        Ok(monitors)
    }

    async fn get_monitor(&self, monitor_id: i32) -> Result<Option<Monitor>, StoreError> {
        let monitor = sqlx::query_as::<_, Monitor>(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = $1"
        ))
        .bind(monitor_id)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(monitor)
    }

    async fn find_monitor_by_push_token(
        &self,
        token: &str,
    ) -> Result<Option<Monitor>, StoreError> {
        let monitor = sqlx::query_as::<_, Monitor>(&format!(
            "SELECT {MONITOR_COLUMNS} FROM monitors WHERE push_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(monitor)
    }

    async fn linked_notification_channels(
        &self,
        monitor_id: i32,
    ) -> Result<Vec<NotificationChannel>, StoreError> {
        let rows = sqlx::query_as::<_, NotificationChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM notification_channels c \
             JOIN monitor_notification_channels mnc ON mnc.channel_id = c.id \
             WHERE mnc.monitor_id = $1 ORDER BY c.id"
        ))
        .bind(monitor_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(self.decode_channels(rows))
    }

    async fn default_notification_channels(
        &self,
        user_id: i32,
    ) -> Result<Vec<NotificationChannel>, StoreError> {
        let rows = sqlx::query_as::<_, NotificationChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM notification_channels c \
             WHERE c.user_id = $1 AND c.is_default = TRUE ORDER BY c.id"
        ))
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(self.decode_channels(rows))
    }

    async fn delete_heartbeats_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM heartbeats WHERE time < $1")
            .bind(cutoff)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }
}
