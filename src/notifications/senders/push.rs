use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::json;

use super::{ensure_success, trim_base, wrong_config, NotificationSender, ProviderEndpoints, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

/// Mobile and desktop push gateways, plus SMS through Twilio.
pub struct PushSender {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl PushSender {
    pub fn new(client: Client, endpoints: ProviderEndpoints) -> Self {
        Self { client, endpoints }
    }

    async fn deliver(request: RequestBuilder, provider: &str) -> Result<(), SenderError> {
        let response = request.send().await?;
        ensure_success(response, provider).await?;
        Ok(())
    }
}

fn missing(what: &str) -> SenderError {
    SenderError::InvalidConfiguration(format!("{what} is required"))
}

/// Gorush platform codes: 1 = iOS, 2 = Android, 3 = Huawei.
fn gorush_platform(platform: &str) -> Result<u8, SenderError> {
    match platform.to_ascii_lowercase().as_str() {
        "ios" => Ok(1),
        "android" => Ok(2),
        "huawei" => Ok(3),
        other => Err(SenderError::InvalidConfiguration(format!(
            "Unknown Gorush platform: {other}"
        ))),
    }
}

#[async_trait]
impl NotificationSender for PushSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        let up = message.is_up();

        match config {
            ChannelConfig::Gotify {
                server_url,
                app_token,
                priority,
            } => {
                if server_url.is_empty() || app_token.is_empty() {
                    return Err(missing("Gotify server URL and application token"));
                }
                let payload = json!({
                    "title": message.title,
                    "message": message.plain_text(),
                    "priority": priority.unwrap_or(if up { 5 } else { 8 }),
                });
                let request = self
                    .client
                    .post(format!("{}/message", trim_base(server_url)))
                    .query(&[("token", app_token)])
                    .json(&payload);
                Self::deliver(request, "Gotify").await
            }
            ChannelConfig::Pushover {
                user_key,
                app_token,
                device,
                sound,
                priority,
            } => {
                if user_key.is_empty() || app_token.is_empty() {
                    return Err(missing("Pushover user key and application token"));
                }
                let mut payload = json!({
                    "token": app_token,
                    "user": user_key,
                    "title": message.title,
                    "message": message.body,
                    "priority": priority.unwrap_or(if up { 0 } else { 1 }),
                    "html": 1,
                });
                if let Some(device) = device {
                    payload["device"] = json!(device);
                }
                if let Some(sound) = sound {
                    payload["sound"] = json!(sound);
                }
                if let Some(url) = &message.monitor_url {
                    payload["url"] = json!(url);
                    payload["url_title"] = json!("View Monitor");
                }
                let request = self
                    .client
                    .post(format!("{}/1/messages.json", trim_base(&self.endpoints.pushover)))
                    .json(&payload);
                Self::deliver(request, "Pushover").await
            }
            ChannelConfig::Ntfy {
                server_url,
                topic,
                priority,
                username,
                password,
            } => {
                if topic.is_empty() {
                    return Err(missing("ntfy topic"));
                }
                let server = server_url.as_deref().unwrap_or("https://ntfy.sh");
                let priority = priority.unwrap_or(if up { 3 } else { 5 });
                let mut request = self
                    .client
                    .post(format!("{}/{}", trim_base(server), topic))
                    .header("Title", message.title.as_str())
                    .header("Priority", priority.to_string())
                    .header("Tags", if up { "white_check_mark" } else { "rotating_light" })
                    .body(message.body.clone());
                if let Some(url) = &message.monitor_url {
                    request = request.header("Click", url.as_str());
                }
                if let Some(username) = username {
                    request = request.basic_auth(username, password.as_deref());
                }
                Self::deliver(request, "ntfy").await
            }
            ChannelConfig::Bark {
                bark_endpoint,
                bark_group,
                bark_sound,
            } => {
                if bark_endpoint.is_empty() {
                    return Err(missing("Bark endpoint"));
                }
                let default_sound = if up { "healthnotification" } else { "alarm" };
                let request = self
                    .client
                    .get(format!("{}/push", trim_base(bark_endpoint)))
                    .query(&[
                        ("title", message.title.as_str()),
                        ("body", message.body.as_str()),
                        ("group", bark_group.as_deref().unwrap_or("NodeNexus")),
                        ("sound", bark_sound.as_deref().unwrap_or(default_sound)),
                    ]);
                Self::deliver(request, "Bark").await
            }
            ChannelConfig::Pushbullet {
                access_token,
                device_iden,
            } => {
                if access_token.is_empty() {
                    return Err(missing("Pushbullet access token"));
                }
                let mut payload = json!({
                    "type": "note",
                    "title": message.title,
                    "body": message.plain_text(),
                });
                if let Some(device) = device_iden {
                    payload["device_iden"] = json!(device);
                }
                let request = self
                    .client
                    .post(format!("{}/v2/pushes", trim_base(&self.endpoints.pushbullet)))
                    .header("Access-Token", access_token.as_str())
                    .json(&payload);
                Self::deliver(request, "Pushbullet").await
            }
            ChannelConfig::Apprise {
                apprise_url,
                urls,
                tag,
            } => {
                if apprise_url.is_empty() {
                    return Err(missing("Apprise API URL"));
                }
                let mut payload = json!({
                    "title": message.title,
                    "body": message.body,
                    "type": if up { "success" } else { "failure" },
                });
                if !urls.is_empty() {
                    payload["urls"] = json!(urls.join(","));
                } else if let Some(tag) = tag {
                    payload["tag"] = json!(tag);
                }
                let request = self
                    .client
                    .post(format!("{}/notify", trim_base(apprise_url)))
                    .json(&payload);
                Self::deliver(request, "Apprise").await
            }
            ChannelConfig::Gorush {
                gorush_server_url,
                gorush_device_token,
                gorush_platform: platform,
                gorush_title,
                gorush_priority,
                gorush_retry,
                gorush_topic,
            } => {
                if gorush_server_url.is_empty() || gorush_device_token.is_empty() {
                    return Err(missing("Gorush server URL and device token"));
                }
                let mut notification = json!({
                    "tokens": [gorush_device_token],
                    "platform": gorush_platform(platform)?,
                    "title": gorush_title.as_deref().unwrap_or(&message.title),
                    "message": message.body,
                    "priority": gorush_priority.as_deref().unwrap_or("high"),
                    "retry": gorush_retry.unwrap_or(0),
                });
                if let Some(topic) = gorush_topic {
                    notification["topic"] = json!(topic);
                }
                let request = self
                    .client
                    .post(format!("{}/api/push", trim_base(gorush_server_url)))
                    .json(&json!({ "notifications": [notification] }));
                Self::deliver(request, "Gorush").await
            }
            ChannelConfig::HomeAssistant {
                server_url,
                access_token,
                notify_service,
            } => {
                if server_url.is_empty() || access_token.is_empty() {
                    return Err(missing("Home Assistant URL and access token"));
                }
                let service = notify_service.as_deref().unwrap_or("notify");
                let payload = json!({
                    "title": message.title,
                    "message": message.body,
                    "data": {
                        "monitor": message.monitor_name,
                        "status": message.status_label(),
                        "url": message.monitor_url,
                    },
                });
                let request = self
                    .client
                    .post(format!("{}/api/services/notify/{service}", trim_base(server_url)))
                    .bearer_auth(access_token)
                    .json(&payload);
                Self::deliver(request, "Home Assistant").await
            }
            ChannelConfig::Twilio {
                account_sid,
                auth_token,
                from_number,
                to_number,
            } => {
                if account_sid.is_empty() || auth_token.is_empty() {
                    return Err(missing("Twilio account SID and auth token"));
                }
                let body = format!("{}\n{}", message.title, message.body);
                let request = self
                    .client
                    .post(format!(
                        "{}/2010-04-01/Accounts/{account_sid}/Messages.json",
                        trim_base(&self.endpoints.twilio)
                    ))
                    .basic_auth(account_sid, Some(auth_token))
                    .form(&[
                        ("From", from_number.as_str()),
                        ("To", to_number.as_str()),
                        ("Body", body.as_str()),
                    ]);
                Self::deliver(request, "Twilio").await
            }
            other => Err(wrong_config("push", other)),
        }
    }
}
