use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::notifications::models::ChannelConfig;
use crate::service_monitor::models::MonitorStatus;

/// A committed check result.
/// Corresponds to the `heartbeats` table. Rows are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub id: i64,
    pub monitor_id: i32,
    pub status: MonitorStatus,
    pub message: String,
    pub ping_ms: i64,
    pub time: DateTime<Utc>,
    pub important: bool,
    pub duration_seconds: i64, // 0 for the first heartbeat of a monitor
}

/// Everything needed to insert a heartbeat; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHeartbeat {
    pub monitor_id: i32,
    pub status: MonitorStatus,
    pub message: String,
    pub ping_ms: i64,
    pub time: DateTime<Utc>,
    pub important: bool,
    pub duration_seconds: i64,
}

impl NewHeartbeat {
    pub fn into_heartbeat(self, id: i64) -> Heartbeat {
        Heartbeat {
            id,
            monitor_id: self.monitor_id,
            status: self.status,
            message: self.message,
            ping_ms: self.ping_ms,
            time: self.time,
            important: self.important,
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Raw `heartbeats` row; the status column is a SMALLINT.
#[derive(Debug, Clone, FromRow)]
pub struct HeartbeatRow {
    pub id: i64,
    pub monitor_id: i32,
    pub status: i16,
    pub message: String,
    pub ping_ms: i64,
    pub time: DateTime<Utc>,
    pub important: bool,
    pub duration_seconds: i64,
}

impl TryFrom<HeartbeatRow> for Heartbeat {
    type Error = String;

    fn try_from(row: HeartbeatRow) -> Result<Self, Self::Error> {
        Ok(Heartbeat {
            id: row.id,
            monitor_id: row.monitor_id,
            status: MonitorStatus::try_from(row.status)?,
            message: row.message,
            ping_ms: row.ping_ms,
            time: row.time,
            important: row.important,
            duration_seconds: row.duration_seconds,
        })
    }
}

/// A notification channel with its configuration already decrypted.
#[derive(Debug, Clone)]
pub struct NotificationChannel {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub config: ChannelConfig,
    pub active: bool,
    pub is_default: bool,
}

/// Raw `notification_channels` row.
/// Corresponds to the `notification_channels` table.
#[derive(Debug, Clone, FromRow)]
pub struct NotificationChannelRow {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub channel_type: String, // e.g., "telegram", "webhook"
    pub config: Vec<u8>,      // Encrypted JSON blob
    pub active: bool,
    pub is_default: bool,
}
