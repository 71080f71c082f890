use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::db::models::Heartbeat;
use crate::service_monitor::recorder::HeartbeatPublisher;

/// JSON-serialized `{ type, monitorId, heartbeat }` frames.
pub type HeartbeatUpdateMsg = String;

#[derive(Debug, Clone)]
pub struct HeartbeatBroadcaster {
    heartbeat_updates_tx: broadcast::Sender<HeartbeatUpdateMsg>,
}

impl HeartbeatBroadcaster {
    pub fn new(heartbeat_updates_tx: broadcast::Sender<HeartbeatUpdateMsg>) -> Self {
        Self {
            heartbeat_updates_tx,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self::new(tx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatUpdateMsg> {
        self.heartbeat_updates_tx.subscribe()
    }

    fn send_message(&self, monitor_id: i32, message_content: serde_json::Value) {
        let json_string = match serde_json::to_string(&message_content) {
            Ok(s) => s,
            Err(e) => {
                error!(monitor_id = monitor_id, error = %e, "Failed to serialize heartbeat update.");
                return;
            }
        };

        let receiver_count = self.heartbeat_updates_tx.receiver_count();
        if receiver_count == 0 {
            debug!(monitor_id = monitor_id, "No active receivers, skipping broadcast.");
            return;
        }
        // only fails when every receiver dropped in the meantime
        if self.heartbeat_updates_tx.send(json_string).is_err() {
            debug!(monitor_id = monitor_id, "Receivers went away before broadcast.");
        } else {
            debug!(
                monitor_id = monitor_id,
                "Broadcasted heartbeat update to {} receivers.", receiver_count
            );
        }
    }
}

impl HeartbeatPublisher for HeartbeatBroadcaster {
    fn publish(&self, monitor_id: i32, heartbeat: &Heartbeat) {
        self.send_message(
            monitor_id,
            json!({
                "type": "heartbeat",
                "monitorId": monitor_id,
                "heartbeat": heartbeat,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_monitor::models::MonitorStatus;
    use chrono::Utc;

    fn heartbeat() -> Heartbeat {
        Heartbeat {
            id: 1,
            monitor_id: 5,
            status: MonitorStatus::Up,
            message: "ok".to_string(),
            ping_ms: 12,
            time: Utc::now(),
            important: true,
            duration_seconds: 0,
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let broadcaster = HeartbeatBroadcaster::with_capacity(4);
        broadcaster.publish(5, &heartbeat());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let broadcaster = HeartbeatBroadcaster::with_capacity(4);
        let mut rx = broadcaster.subscribe();
        broadcaster.publish(5, &heartbeat());

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "heartbeat");
        assert_eq!(frame["monitorId"], 5);
        assert_eq!(frame["heartbeat"]["status"], 1);
        assert_eq!(frame["heartbeat"]["pingMs"], 12);
    }
}
