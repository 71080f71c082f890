//! Team chat and messenger integrations: incoming-webhook style APIs.
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{header, Client};
use serde_json::{json, Value};
use sha2::Sha256;

use super::{ensure_success, trim_base, wrong_config, NotificationSender, ProviderEndpoints, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

const GREEN: u32 = 0x2ecc71;
const RED: u32 = 0xe74c3c;

pub struct ChatSender {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl ChatSender {
    pub fn new(client: Client, endpoints: ProviderEndpoints) -> Self {
        Self { client, endpoints }
    }

    async fn post_json(&self, url: &str, provider: &str, body: &Value) -> Result<(), SenderError> {
        let response = self.client.post(url).json(body).send().await?;
        ensure_success(response, provider).await?;
        Ok(())
    }
}

fn require(value: &str, what: &str) -> Result<(), SenderError> {
    if value.trim().is_empty() {
        return Err(SenderError::InvalidConfiguration(format!("{what} is required")));
    }
    Ok(())
}

fn status_emoji(message: &NotificationMessage) -> &'static str {
    if message.is_up() {
        "✅"
    } else {
        "❌"
    }
}

fn discord_payload(message: &NotificationMessage, username: Option<&str>) -> Value {
    let mut fields = vec![
        json!({ "name": "Monitor", "value": message.monitor_name, "inline": true }),
        json!({ "name": "Response Time", "value": format!("{}ms", message.ping_ms), "inline": true }),
    ];
    if let Some(url) = &message.monitor_url {
        fields.push(json!({ "name": "URL", "value": url, "inline": false }));
    }
    json!({
        "username": username.unwrap_or("NodeNexus Uptime"),
        "embeds": [{
            "title": message.title,
            "description": message.body,
            "color": if message.is_up() { GREEN } else { RED },
            "fields": fields,
            "timestamp": message.time_rfc3339(),
            "footer": { "text": "NodeNexus Uptime" },
        }],
    })
}

fn slack_payload(message: &NotificationMessage, channel: Option<&str>) -> Value {
    json!({
        "channel": channel,
        "username": "NodeNexus Uptime",
        "attachments": [{
            "color": if message.is_up() { "good" } else { "danger" },
            "title": message.title,
            "text": message.body,
            "fields": [
                { "title": "Monitor", "value": message.monitor_name, "short": true },
                { "title": "Response Time", "value": format!("{}ms", message.ping_ms), "short": true },
            ],
            "footer": "NodeNexus Uptime",
            "ts": message.time.timestamp(),
        }],
    })
}

fn teams_payload(message: &NotificationMessage) -> Value {
    let mut facts = vec![
        json!({ "name": "Monitor", "value": message.monitor_name }),
        json!({ "name": "Status", "value": format!("{} {}", status_emoji(message), message.status) }),
        json!({ "name": "Response Time", "value": format!("{}ms", message.ping_ms) }),
    ];
    let mut actions = Vec::new();
    if let Some(url) = &message.monitor_url {
        facts.push(json!({ "name": "URL", "value": url }));
        actions.push(json!({
            "@type": "OpenUri",
            "name": "View Monitor",
            "targets": [{ "os": "default", "uri": url }],
        }));
    }
    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": if message.is_up() { "2ecc71" } else { "e74c3c" },
        "summary": message.title,
        "sections": [{ "activityTitle": message.title, "facts": facts, "markdown": true }],
        "potentialAction": actions,
    })
}

fn feishu_payload(message: &NotificationMessage) -> Value {
    let mut elements = vec![
        json!({ "tag": "div", "text": { "tag": "lark_md", "content": message.body } }),
        json!({
            "tag": "div",
            "fields": [
                { "is_short": true, "text": { "tag": "lark_md", "content": format!("**Monitor:** {}", message.monitor_name) } },
                { "is_short": true, "text": { "tag": "lark_md", "content": format!("**Ping:** {}ms", message.ping_ms) } },
            ],
        }),
    ];
    if let Some(url) = &message.monitor_url {
        elements.push(json!({
            "tag": "action",
            "actions": [{
                "tag": "button",
                "text": { "tag": "plain_text", "content": "View Monitor" },
                "type": "primary",
                "url": url,
            }],
        }));
    }
    json!({
        "msg_type": "interactive",
        "card": {
            "config": { "wide_screen_mode": true },
            "header": {
                "title": { "tag": "plain_text", "content": format!("{} {}", status_emoji(message), message.title) },
                "template": if message.is_up() { "green" } else { "red" },
            },
            "elements": elements,
        },
    })
}

fn dingtalk_payload(message: &NotificationMessage) -> Value {
    let mut text = format!(
        "### {} {}\n\n**Monitor:** {}\n\n**Status:** {}\n\n**Response Time:** {}ms\n\n{}\n\n",
        status_emoji(message),
        message.title,
        message.monitor_name,
        message.status,
        message.ping_ms,
        message.body
    );
    if let Some(url) = &message.monitor_url {
        text.push_str(&format!("[View Monitor]({url})"));
    }
    json!({ "msgtype": "markdown", "markdown": { "title": message.title, "text": text } })
}

/// Appends DingTalk's `timestamp` and HMAC-SHA256 `sign` query parameters.
fn dingtalk_signed_url(webhook_url: &str, secret: &str, timestamp_ms: i64) -> Result<String, SenderError> {
    let string_to_sign = format!("{timestamp_ms}\n{secret}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid DingTalk secret: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    let sign = STANDARD.encode(mac.finalize().into_bytes());
    let separator = if webhook_url.contains('?') { '&' } else { '?' };
    Ok(format!(
        "{webhook_url}{separator}timestamp={timestamp_ms}&sign={}",
        urlencoding::encode(&sign)
    ))
}

fn wecom_payload(message: &NotificationMessage) -> Value {
    let mut content = format!(
        "### {} {}\n> **Monitor:** {}\n> **Status:** <font color=\"{}\">{}</font>\n> **Response Time:** {}ms\n\n{}",
        status_emoji(message),
        message.title,
        message.monitor_name,
        if message.is_up() { "info" } else { "warning" },
        message.status,
        message.ping_ms,
        message.body
    );
    if let Some(url) = &message.monitor_url {
        content.push_str(&format!("\n\n[View Monitor]({url})"));
    }
    json!({ "msgtype": "markdown", "markdown": { "content": content } })
}

fn google_chat_payload(message: &NotificationMessage) -> Value {
    json!({
        "cards": [{
            "header": {
                "title": message.title,
                "subtitle": format!("Service is {}", message.status),
            },
            "sections": [{
                "widgets": [
                    { "textParagraph": { "text": message.body } },
                    { "keyValue": { "topLabel": "Status", "content": message.status.as_str(), "contentMultiline": false } },
                    { "keyValue": { "topLabel": "Time", "content": message.time_rfc3339(), "contentMultiline": false } },
                ],
            }],
        }],
    })
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[async_trait]
impl NotificationSender for ChatSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        let attachment_color = if message.is_up() { "#2ecc71" } else { "#e74c3c" };

        match config {
            ChannelConfig::Discord {
                webhook_url,
                username,
            } => {
                require(webhook_url, "Discord webhook URL")?;
                self.post_json(webhook_url, "Discord", &discord_payload(message, username.as_deref()))
                    .await
            }
            ChannelConfig::Slack {
                webhook_url,
                channel,
            } => {
                require(webhook_url, "Slack webhook URL")?;
                self.post_json(webhook_url, "Slack", &slack_payload(message, channel.as_deref()))
                    .await
            }
            ChannelConfig::Teams { webhook_url } => {
                require(webhook_url, "Microsoft Teams webhook URL")?;
                self.post_json(webhook_url, "Microsoft Teams", &teams_payload(message))
                    .await
            }
            ChannelConfig::Mattermost {
                webhook_url,
                channel,
                username,
                icon_url,
            } => {
                require(webhook_url, "Mattermost webhook URL")?;
                let mut payload = json!({
                    "text": message.title,
                    "attachments": [{
                        "color": attachment_color,
                        "text": message.body,
                        "fallback": format!("{}: {}", message.title, message.body),
                    }],
                });
                if let Some(channel) = channel {
                    payload["channel"] = json!(channel);
                }
                if let Some(username) = username {
                    payload["username"] = json!(username);
                }
                if let Some(icon_url) = icon_url {
                    payload["icon_url"] = json!(icon_url);
                }
                self.post_json(webhook_url, "Mattermost", &payload).await
            }
            ChannelConfig::RocketChat {
                webhook_url,
                username,
                icon_emoji,
            } => {
                require(webhook_url, "Rocket.Chat webhook URL")?;
                let mut payload = json!({
                    "text": message.title,
                    "attachments": [{
                        "color": attachment_color,
                        "text": message.body,
                        "ts": message.time_rfc3339(),
                    }],
                });
                if let Some(username) = username {
                    payload["username"] = json!(username);
                }
                if let Some(emoji) = icon_emoji {
                    payload["emoji"] = json!(emoji);
                }
                self.post_json(webhook_url, "Rocket.Chat", &payload).await
            }
            ChannelConfig::GoogleChat { webhook_url } => {
                require(webhook_url, "Google Chat webhook URL")?;
                self.post_json(webhook_url, "Google Chat", &google_chat_payload(message))
                    .await
            }
            ChannelConfig::Matrix {
                homeserver_url,
                access_token,
                room_id,
            } => {
                require(homeserver_url, "Matrix homeserver URL")?;
                require(access_token, "Matrix access token")?;
                require(room_id, "Matrix room ID")?;
                let url = format!(
                    "{}/_matrix/client/r0/rooms/{}/send/m.room.message",
                    trim_base(homeserver_url),
                    urlencoding::encode(room_id)
                );
                let emoji = status_emoji(message);
                let payload = json!({
                    "msgtype": "m.text",
                    "body": format!("{emoji} {}\n\n{}", message.title, message.body),
                    "format": "org.matrix.custom.html",
                    "formatted_body": format!(
                        "<strong>{emoji} {}</strong><br/><br/>{}",
                        html_escape(&message.title),
                        html_escape(&message.body).replace('\n', "<br/>")
                    ),
                });
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(access_token)
                    .json(&payload)
                    .send()
                    .await?;
                ensure_success(response, "Matrix").await?;
                Ok(())
            }
            ChannelConfig::Feishu { webhook_url } => {
                require(webhook_url, "Feishu webhook URL")?;
                self.post_json(webhook_url, "Feishu", &feishu_payload(message)).await
            }
            ChannelConfig::Dingtalk {
                webhook_url,
                secret,
            } => {
                require(webhook_url, "DingTalk webhook URL")?;
                let url = match secret.as_deref().filter(|s| !s.is_empty()) {
                    Some(secret) => {
                        dingtalk_signed_url(webhook_url, secret, Utc::now().timestamp_millis())?
                    }
                    None => webhook_url.clone(),
                };
                self.post_json(&url, "DingTalk", &dingtalk_payload(message)).await
            }
            ChannelConfig::Wecom { webhook_url } => {
                require(webhook_url, "WeCom webhook URL")?;
                self.post_json(webhook_url, "WeCom", &wecom_payload(message)).await
            }
            ChannelConfig::Line {
                channel_access_token,
                user_id,
            } => {
                require(channel_access_token, "LINE channel access token")?;
                require(user_id, "LINE user ID")?;
                let payload = json!({
                    "to": user_id,
                    "messages": [{ "type": "text", "text": message.plain_text() }],
                });
                let response = self
                    .client
                    .post(format!("{}/v2/bot/message/push", trim_base(&self.endpoints.line)))
                    .bearer_auth(channel_access_token)
                    .header(header::CONTENT_TYPE, "application/json")
                    .json(&payload)
                    .send()
                    .await?;
                ensure_success(response, "LINE").await?;
                Ok(())
            }
            ChannelConfig::Signal {
                signal_url,
                number,
                recipients,
            } => {
                require(signal_url, "Signal API URL")?;
                let recipients: Vec<&str> = recipients
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .collect();
                let payload = json!({
                    "number": number,
                    "recipients": recipients,
                    "message": format!("{}\n\n{}", message.title, message.body),
                });
                self.post_json(&format!("{}/v2/send", trim_base(signal_url)), "Signal", &payload)
                    .await
            }
            other => Err(wrong_config("chat", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_monitor::models::MonitorStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message(status: MonitorStatus) -> NotificationMessage {
        NotificationMessage {
            title: format!("API is {status}"),
            body: "Connection refused".to_string(),
            monitor_name: "API".to_string(),
            monitor_url: None,
            status,
            previous_status: None,
            ping_ms: 7,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_discord_payload_colors() {
        let up = discord_payload(&message(MonitorStatus::Up), None);
        assert_eq!(up["embeds"][0]["color"], json!(GREEN));
        assert_eq!(up["username"], json!("NodeNexus Uptime"));

        let down = discord_payload(&message(MonitorStatus::Down), Some("bot"));
        assert_eq!(down["embeds"][0]["color"], json!(RED));
        assert_eq!(down["username"], json!("bot"));
        assert_eq!(down["embeds"][0]["fields"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_dingtalk_signed_url() {
        let url = dingtalk_signed_url("https://oapi.dingtalk.com/robot/send?access_token=a", "SEC123", 1_700_000_000_000)
            .unwrap();
        assert!(url.starts_with("https://oapi.dingtalk.com/robot/send?access_token=a&timestamp=1700000000000&sign="));

        // same input, same signature
        let again = dingtalk_signed_url("https://oapi.dingtalk.com/robot/send?access_token=a", "SEC123", 1_700_000_000_000)
            .unwrap();
        assert_eq!(url, again);
    }

    #[tokio::test]
    async fn test_slack_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/T000"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = ChatSender::new(Client::new(), ProviderEndpoints::default());
        let config = ChannelConfig::Slack {
            webhook_url: format!("{}/services/T000", server.uri()),
            channel: Some("#ops".to_string()),
        };
        sender.send(&config, &message(MonitorStatus::Down)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dingtalk_delivery_includes_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/robot/send"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = ChatSender::new(Client::new(), ProviderEndpoints::default());
        let config = ChannelConfig::Dingtalk {
            webhook_url: format!("{}/robot/send", server.uri()),
            secret: Some("SEC123".to_string()),
        };
        sender.send(&config, &message(MonitorStatus::Up)).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let query = requests[0].url.query().unwrap_or_default().to_string();
        assert!(query.contains("timestamp="));
        assert!(query.contains("sign="));
    }

    #[tokio::test]
    async fn test_rejects_missing_webhook_and_foreign_config() {
        let sender = ChatSender::new(Client::new(), ProviderEndpoints::default());
        let err = sender
            .send(
                &ChannelConfig::Teams {
                    webhook_url: String::new(),
                },
                &message(MonitorStatus::Down),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));

        let err = sender
            .send(
                &ChannelConfig::Telegram {
                    bot_token: "t".to_string(),
                    chat_id: "1".to_string(),
                },
                &message(MonitorStatus::Down),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }
}
