//! Inbound heartbeats for `push` monitors.
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::models::{CheckResult, MonitorStatus};
use super::recorder::{HeartbeatRecorder, RecordOutcome};
use crate::db::{MonitorStore, StoreError};

pub const DEFAULT_PUSH_MESSAGE: &str = "Push received";

#[derive(Error, Debug)]
pub enum PushError {
    #[error("Monitor not found or not a push monitor")]
    UnknownToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Query string of `/api/push/{token}`. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PushParams {
    pub status: Option<String>,
    pub msg: Option<String>,
    pub ping: Option<String>,
}

impl PushParams {
    /// Converts the reported values into a check result, before upside-down mode.
    pub fn to_result(&self) -> CheckResult {
        let status = match self.status.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "down" => MonitorStatus::Down,
            Some(s) if s == "pending" => MonitorStatus::Pending,
            _ => MonitorStatus::Up,
        };
        let ping_ms = self
            .ping
            .as_deref()
            .and_then(|p| p.trim().parse::<f64>().ok())
            .filter(|p| p.is_finite() && *p >= 0.0)
            .map(|p| p.round() as u64)
            .unwrap_or(0);
        let message = self
            .msg
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_PUSH_MESSAGE);
        CheckResult::new(status, ping_ms, message)
    }
}

#[derive(Debug)]
pub enum PushOutcome {
    Recorded(RecordOutcome),
    /// The monitor exists but is inactive; nothing was recorded.
    Paused,
}

pub struct PushReceiver {
    store: Arc<dyn MonitorStore>,
    recorder: Arc<HeartbeatRecorder>,
}

impl PushReceiver {
    pub fn new(store: Arc<dyn MonitorStore>, recorder: Arc<HeartbeatRecorder>) -> Self {
        Self { store, recorder }
    }

    /// Records a pushed heartbeat through the same path as a scheduled check.
    pub async fn receive(&self, token: &str, params: &PushParams) -> Result<PushOutcome, PushError> {
        let monitor = self
            .store
            .find_monitor_by_push_token(token)
            .await?
            .filter(|m| m.is_push())
            .ok_or(PushError::UnknownToken)?;

        if !monitor.active {
            debug!(monitor_id = monitor.id, "Push received for paused monitor, ignoring.");
            return Ok(PushOutcome::Paused);
        }

        let mut result = params.to_result();
        if monitor.upside_down {
            result.status = result.status.inverted();
        }
        info!(
            monitor_id = monitor.id,
            status = %result.status,
            "Push heartbeat received."
        );
        let outcome = self.recorder.record(&monitor, result).await?;
        Ok(PushOutcome::Recorded(outcome))
    }
}
