use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{ensure_success, trim_base, wrong_config, NotificationSender, ProviderEndpoints, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

/// Incident management platforms. A DOWN message opens an incident and an
/// UP message resolves the one opened for the same monitor.
pub struct IncidentSender {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl IncidentSender {
    pub fn new(client: Client, endpoints: ProviderEndpoints) -> Self {
        Self { client, endpoints }
    }
}

/// Stable per-monitor key so that resolve events match the open incident.
fn dedup_key(message: &NotificationMessage) -> String {
    let sanitized: String = message
        .monitor_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("nodenexus-{sanitized}")
}

#[async_trait]
impl NotificationSender for IncidentSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        let up = message.is_up();

        let response = match config {
            ChannelConfig::Pagerduty {
                integration_key,
                severity,
            } => {
                if integration_key.is_empty() {
                    return Err(SenderError::InvalidConfiguration(
                        "PagerDuty integration key is required".to_string(),
                    ));
                }
                let payload = json!({
                    "routing_key": integration_key,
                    "event_action": if up { "resolve" } else { "trigger" },
                    "dedup_key": dedup_key(message),
                    "payload": {
                        "summary": message.title,
                        "source": message.monitor_url.as_deref().unwrap_or(&message.monitor_name),
                        "severity": severity.as_deref().unwrap_or("critical"),
                        "timestamp": message.time_rfc3339(),
                        "custom_details": {
                            "message": message.body,
                            "ping": message.ping_ms,
                        },
                    },
                });
                self.client
                    .post(format!("{}/v2/enqueue", trim_base(&self.endpoints.pagerduty)))
                    .json(&payload)
                    .send()
                    .await?
            }
            ChannelConfig::Opsgenie {
                api_key,
                region,
                priority,
            } => {
                if api_key.is_empty() {
                    return Err(SenderError::InvalidConfiguration(
                        "Opsgenie API key is required".to_string(),
                    ));
                }
                let base = if region.as_deref() == Some("eu") {
                    &self.endpoints.opsgenie_eu
                } else {
                    &self.endpoints.opsgenie_us
                };
                let alias = dedup_key(message);
                let request = if up {
                    self.client
                        .post(format!("{}/v2/alerts/{alias}/close", trim_base(base)))
                        .query(&[("identifierType", "alias")])
                        .json(&json!({ "source": "NodeNexus", "note": message.body }))
                } else {
                    self.client.post(format!("{}/v2/alerts", trim_base(base))).json(&json!({
                        "message": message.title,
                        "alias": alias,
                        "description": message.plain_text(),
                        "priority": priority.as_deref().unwrap_or("P1"),
                        "source": "NodeNexus",
                        "tags": ["uptime", message.status_label()],
                    }))
                };
                request
                    .header("Authorization", format!("GenieKey {api_key}"))
                    .send()
                    .await?
            }
            ChannelConfig::Splunk {
                server_url,
                token,
                source,
                source_type,
                index,
            } => {
                if server_url.is_empty() || token.is_empty() {
                    return Err(SenderError::InvalidConfiguration(
                        "Splunk HEC URL and token are required".to_string(),
                    ));
                }
                let mut payload = json!({
                    "time": message.time.timestamp(),
                    "source": source.as_deref().unwrap_or("nodenexus"),
                    "sourcetype": source_type.as_deref().unwrap_or("_json"),
                    "event": {
                        "title": message.title,
                        "message": message.body,
                        "monitor": message.monitor_name,
                        "url": message.monitor_url,
                        "status": message.status_label(),
                        "ping": message.ping_ms,
                    },
                });
                if let Some(index) = index {
                    payload["index"] = json!(index);
                }
                self.client
                    .post(format!("{}/services/collector/event", trim_base(server_url)))
                    .header("Authorization", format!("Splunk {token}"))
                    .json(&payload)
                    .send()
                    .await?
            }
            ChannelConfig::GrafanaOncall { webhook_url } => {
                if webhook_url.is_empty() {
                    return Err(SenderError::InvalidConfiguration(
                        "Grafana OnCall webhook URL is required".to_string(),
                    ));
                }
                self.client
                    .post(webhook_url)
                    .json(&json!({
                        "alert_uid": dedup_key(message),
                        "title": message.title,
                        "message": message.body,
                        "state": if up { "ok" } else { "alerting" },
                        "link_to_upstream_details": message.monitor_url,
                    }))
                    .send()
                    .await?
            }
            other => return Err(wrong_config("incident", other)),
        };

        ensure_success(response, config.channel_type()).await?;
        Ok(())
    }
}
