use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::models::Heartbeat;
use crate::service_monitor::models::{Monitor, MonitorStatus};

/// Represents the different types of notification channel configurations.
/// This enum is serialized to JSON and then encrypted before being stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChannelConfig {
    Telegram {
        bot_token: String,
        chat_id: String,
    },
    Webhook {
        url: String,
        method: Option<String>, // "GET", "POST" or "PUT"; POST when absent
        headers: Option<HashMap<String, String>>,
        #[serde(alias = "body")]
        body_template: Option<String>, // Tera template for the request body
    },
    Discord {
        webhook_url: String,
        username: Option<String>,
    },
    Slack {
        webhook_url: String,
        channel: Option<String>,
    },
    Teams {
        webhook_url: String,
    },
    Mattermost {
        webhook_url: String,
        channel: Option<String>,
        username: Option<String>,
        icon_url: Option<String>,
    },
    RocketChat {
        webhook_url: String,
        username: Option<String>,
        icon_emoji: Option<String>,
    },
    GoogleChat {
        webhook_url: String,
    },
    Matrix {
        homeserver_url: String,
        access_token: String,
        room_id: String,
    },
    Feishu {
        webhook_url: String,
    },
    Dingtalk {
        webhook_url: String,
        secret: Option<String>,
    },
    Wecom {
        webhook_url: String,
    },
    Line {
        channel_access_token: String,
        user_id: String,
    },
    Signal {
        signal_url: String,
        number: String,
        recipients: String, // comma separated
    },
    Gotify {
        server_url: String,
        app_token: String,
        priority: Option<i64>,
    },
    Pushover {
        user_key: String,
        app_token: String,
        device: Option<String>,
        sound: Option<String>,
        priority: Option<i64>,
    },
    Ntfy {
        server_url: Option<String>,
        topic: String,
        priority: Option<i64>,
        username: Option<String>,
        password: Option<String>,
    },
    Bark {
        bark_endpoint: String,
        bark_group: Option<String>,
        bark_sound: Option<String>,
    },
    Pushbullet {
        access_token: String,
        device_iden: Option<String>,
    },
    Apprise {
        apprise_url: String,
        #[serde(default)]
        urls: Vec<String>,
        tag: Option<String>,
    },
    Gorush {
        #[serde(rename = "gorushServerURL", alias = "gorushServerUrl")]
        gorush_server_url: String,
        gorush_device_token: String,
        gorush_platform: String, // "ios", "android" or "huawei"
        gorush_title: Option<String>,
        gorush_priority: Option<String>,
        gorush_retry: Option<u32>,
        gorush_topic: Option<String>,
    },
    HomeAssistant {
        server_url: String,
        access_token: String,
        notify_service: Option<String>,
    },
    Twilio {
        account_sid: String,
        auth_token: String,
        from_number: String,
        to_number: String,
    },
    Pagerduty {
        integration_key: String,
        severity: Option<String>,
    },
    Opsgenie {
        api_key: String,
        region: Option<String>, // "us" or "eu"
        priority: Option<String>,
    },
    Splunk {
        server_url: String,
        token: String,
        source: Option<String>,
        source_type: Option<String>,
        index: Option<String>,
    },
    GrafanaOncall {
        webhook_url: String,
    },
    Email {
        smtp_host: String,
        smtp_port: Option<u16>,
        #[serde(default)]
        smtp_secure: bool,
        smtp_username: Option<String>,
        smtp_password: Option<String>,
        from_email: String,
        to_email: String,
    },
}

impl ChannelConfig {
    /// The `type` tag, as stored in the `channel_type` column.
    pub fn channel_type(&self) -> &'static str {
        match self {
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::Discord { .. } => "discord",
            ChannelConfig::Slack { .. } => "slack",
            ChannelConfig::Teams { .. } => "teams",
            ChannelConfig::Mattermost { .. } => "mattermost",
            ChannelConfig::RocketChat { .. } => "rocket-chat",
            ChannelConfig::GoogleChat { .. } => "google-chat",
            ChannelConfig::Matrix { .. } => "matrix",
            ChannelConfig::Feishu { .. } => "feishu",
            ChannelConfig::Dingtalk { .. } => "dingtalk",
            ChannelConfig::Wecom { .. } => "wecom",
            ChannelConfig::Line { .. } => "line",
            ChannelConfig::Signal { .. } => "signal",
            ChannelConfig::Gotify { .. } => "gotify",
            ChannelConfig::Pushover { .. } => "pushover",
            ChannelConfig::Ntfy { .. } => "ntfy",
            ChannelConfig::Bark { .. } => "bark",
            ChannelConfig::Pushbullet { .. } => "pushbullet",
            ChannelConfig::Apprise { .. } => "apprise",
            ChannelConfig::Gorush { .. } => "gorush",
            ChannelConfig::HomeAssistant { .. } => "home-assistant",
            ChannelConfig::Twilio { .. } => "twilio",
            ChannelConfig::Pagerduty { .. } => "pagerduty",
            ChannelConfig::Opsgenie { .. } => "opsgenie",
            ChannelConfig::Splunk { .. } => "splunk",
            ChannelConfig::GrafanaOncall { .. } => "grafana-oncall",
            ChannelConfig::Email { .. } => "email",
        }
    }
}

/// The provider-independent content of a status change notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub monitor_name: String,
    pub monitor_url: Option<String>,
    pub status: MonitorStatus,
    pub previous_status: Option<MonitorStatus>,
    pub ping_ms: i64,
    pub time: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn for_heartbeat(
        monitor: &Monitor,
        heartbeat: &Heartbeat,
        previous_status: Option<MonitorStatus>,
    ) -> Self {
        let emoji = match heartbeat.status {
            MonitorStatus::Up => "🟢",
            MonitorStatus::Down => "🔴",
            MonitorStatus::Pending => "🟡",
            MonitorStatus::Maintenance => "🔵",
        };
        Self {
            title: format!("{emoji} {} is {}", monitor.name, heartbeat.status),
            body: heartbeat.message.clone(),
            monitor_name: monitor.name.clone(),
            monitor_url: monitor.target_url(),
            status: heartbeat.status,
            previous_status,
            ping_ms: heartbeat.ping_ms,
            time: heartbeat.time,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == MonitorStatus::Up
    }

    /// Lowercase status word used by most provider payloads ("up", "down", ...).
    pub fn status_label(&self) -> String {
        self.status.as_str().to_lowercase()
    }

    pub fn time_rfc3339(&self) -> String {
        self.time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Plain-text rendering shared by the text-only providers.
    pub fn plain_text(&self) -> String {
        let mut text = format!(
            "{}\nMonitor: {}\nStatus: {}\nMessage: {}\nResponse Time: {}ms",
            self.title, self.monitor_name, self.status, self.body, self.ping_ms
        );
        if let Some(url) = &self.monitor_url {
            text.push_str(&format!("\nURL: {url}"));
        }
        text
    }

    /// Variables exposed to user-supplied body templates.
    pub fn template_context(&self) -> HashMap<String, String> {
        let mut context = HashMap::new();
        context.insert("title".to_string(), self.title.clone());
        context.insert("body".to_string(), self.body.clone());
        context.insert("monitor_name".to_string(), self.monitor_name.clone());
        context.insert(
            "monitor_url".to_string(),
            self.monitor_url.clone().unwrap_or_default(),
        );
        context.insert("status".to_string(), self.status_label());
        context.insert(
            "previous_status".to_string(),
            self.previous_status
                .map(|s| s.as_str().to_lowercase())
                .unwrap_or_default(),
        );
        context.insert("ping".to_string(), self.ping_ms.to_string());
        context.insert("time".to_string(), self.time_rfc3339());
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_config_uses_kebab_case_tags_and_camel_case_fields() {
        let config: ChannelConfig = serde_json::from_value(json!({
            "type": "rocket-chat",
            "webhookUrl": "https://chat.example.com/hooks/abc",
            "iconEmoji": ":bell:"
        }))
        .unwrap();
        assert_eq!(
            config,
            ChannelConfig::RocketChat {
                webhook_url: "https://chat.example.com/hooks/abc".to_string(),
                username: None,
                icon_emoji: Some(":bell:".to_string()),
            }
        );
        assert_eq!(config.channel_type(), "rocket-chat");

        let gorush: ChannelConfig = serde_json::from_value(json!({
            "type": "gorush",
            "gorushServerURL": "http://gorush",
            "gorushDeviceToken": "tok",
            "gorushPlatform": "ios"
        }))
        .unwrap();
        assert_eq!(gorush.channel_type(), "gorush");
    }

    #[test]
    fn test_webhook_accepts_legacy_body_field() {
        let config: ChannelConfig = serde_json::from_value(json!({
            "type": "webhook",
            "url": "http://hook",
            "body": "{\"text\":\"{{ title }}\"}"
        }))
        .unwrap();
        match config {
            ChannelConfig::Webhook { body_template, .. } => {
                assert_eq!(body_template.as_deref(), Some("{\"text\":\"{{ title }}\"}"))
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_message_for_heartbeat() {
        let monitor = Monitor {
            id: 3,
            user_id: 1,
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
        };
        let heartbeat = Heartbeat {
            id: 9,
            monitor_id: 3,
            status: MonitorStatus::Down,
            message: "HTTP 500 - Internal Server Error".to_string(),
            ping_ms: 120,
            time: Utc::now(),
            important: true,
            duration_seconds: 60,
        };

        let message =
            NotificationMessage::for_heartbeat(&monitor, &heartbeat, Some(MonitorStatus::Up));
        assert_eq!(message.title, "🔴 API is DOWN");
        assert_eq!(message.monitor_url.as_deref(), Some("https://api.example.com"));
        assert!(!message.is_up());

        let context = message.template_context();
        assert_eq!(context["status"], "down");
        assert_eq!(context["previous_status"], "up");
        assert_eq!(context["ping"], "120");
    }
}
