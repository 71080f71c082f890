use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use super::models::{ChannelConfig, NotificationMessage};

pub mod chat;
pub mod email;
pub mod incident;
pub mod push;
pub mod telegram;
pub mod webhook;

use chat::ChatSender;
use email::EmailSender;
use incident::IncidentSender;
use push::PushSender;
use telegram::TelegramSender;
use webhook::WebhookSender;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    TemplatingError(String),
    #[error("Email error: {0}")]
    EmailError(String),
}

/// A trait for delivering a notification to one kind of channel.
/// Implementations match on the [`ChannelConfig`] variants they own and
/// reject the rest with [`SenderError::InvalidConfiguration`].
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError>;
}

/// Base URLs of providers that expose a fixed public API.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub telegram: String,
    pub line: String,
    pub pushover: String,
    pub pushbullet: String,
    pub twilio: String,
    pub pagerduty: String,
    pub opsgenie_us: String,
    pub opsgenie_eu: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            telegram: "https://api.telegram.org".to_string(),
            line: "https://api.line.me".to_string(),
            pushover: "https://api.pushover.net".to_string(),
            pushbullet: "https://api.pushbullet.com".to_string(),
            twilio: "https://api.twilio.com".to_string(),
            pagerduty: "https://events.pagerduty.com".to_string(),
            opsgenie_us: "https://api.opsgenie.com".to_string(),
            opsgenie_eu: "https://api.eu.opsgenie.com".to_string(),
        }
    }
}

/// Owns one sender per provider family and routes a config to it.
pub struct SenderRegistry {
    telegram: TelegramSender,
    webhook: WebhookSender,
    chat: ChatSender,
    push: PushSender,
    incident: IncidentSender,
    email: EmailSender,
}

impl SenderRegistry {
    /// Builds the registry with a shared HTTP client bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SenderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_endpoints(client, ProviderEndpoints::default(), timeout))
    }

    pub fn with_endpoints(client: Client, endpoints: ProviderEndpoints, timeout: Duration) -> Self {
        Self {
            telegram: TelegramSender::new(client.clone(), endpoints.telegram.clone()),
            webhook: WebhookSender::new(client.clone()),
            chat: ChatSender::new(client.clone(), endpoints.clone()),
            push: PushSender::new(client.clone(), endpoints.clone()),
            incident: IncidentSender::new(client, endpoints),
            email: EmailSender::new(timeout),
        }
    }

    pub fn sender_for(&self, config: &ChannelConfig) -> &dyn NotificationSender {
        match config {
            ChannelConfig::Telegram { .. } => &self.telegram,
            ChannelConfig::Webhook { .. } => &self.webhook,
            ChannelConfig::Discord { .. }
            | ChannelConfig::Slack { .. }
            | ChannelConfig::Teams { .. }
            | ChannelConfig::Mattermost { .. }
            | ChannelConfig::RocketChat { .. }
            | ChannelConfig::GoogleChat { .. }
            | ChannelConfig::Matrix { .. }
            | ChannelConfig::Feishu { .. }
            | ChannelConfig::Dingtalk { .. }
            | ChannelConfig::Wecom { .. }
            | ChannelConfig::Line { .. }
            | ChannelConfig::Signal { .. } => &self.chat,
            ChannelConfig::Gotify { .. }
            | ChannelConfig::Pushover { .. }
            | ChannelConfig::Ntfy { .. }
            | ChannelConfig::Bark { .. }
            | ChannelConfig::Pushbullet { .. }
            | ChannelConfig::Apprise { .. }
            | ChannelConfig::Gorush { .. }
            | ChannelConfig::HomeAssistant { .. }
            | ChannelConfig::Twilio { .. } => &self.push,
            ChannelConfig::Pagerduty { .. }
            | ChannelConfig::Opsgenie { .. }
            | ChannelConfig::Splunk { .. }
            | ChannelConfig::GrafanaOncall { .. } => &self.incident,
            ChannelConfig::Email { .. } => &self.email,
        }
    }

    pub async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        self.sender_for(config).send(config, message).await
    }
}

/// Turns a non-2xx provider response into [`SenderError::SendFailed`] with the body attached.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::SendFailed(format!(
        "{provider} returned non-success status: {status}. Body: {error_body}"
    )))
}

pub(crate) fn wrong_config(expected: &str, config: &ChannelConfig) -> SenderError {
    SenderError::InvalidConfiguration(format!(
        "Expected {expected} config, but found {}.",
        config.channel_type()
    ))
}

pub(crate) fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}
