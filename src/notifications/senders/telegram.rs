use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{ensure_success, trim_base, wrong_config, NotificationSender, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

/// A sender for pushing notifications via the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    api_base: String,
}

impl TelegramSender {
    pub fn new(client: Client, api_base: String) -> Self {
        Self { client, api_base }
    }

    /// Escapes text for Telegram MarkdownV2.
    /// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . !
    fn escape_markdown_v2(text: &str) -> String {
        let mut escaped_text = String::with_capacity(text.len());
        for char_to_escape in text.chars() {
            match char_to_escape {
                '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                | '|' | '{' | '}' | '.' | '!' | '\\' => {
                    escaped_text.push('\\');
                    escaped_text.push(char_to_escape);
                }
                _ => escaped_text.push(char_to_escape),
            }
        }
        escaped_text
    }

    fn render(message: &NotificationMessage) -> String {
        let mut text = format!(
            "*{}*\n*Monitor:* {}\n*Status:* {}\n*Message:* {}\n*Response Time:* {}ms",
            Self::escape_markdown_v2(&message.title),
            Self::escape_markdown_v2(&message.monitor_name),
            message.status,
            Self::escape_markdown_v2(&message.body),
            message.ping_ms,
        );
        if let Some(url) = &message.monitor_url {
            text.push_str(&format!("\n*URL:* {}", Self::escape_markdown_v2(url)));
        }
        text
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Telegram { bot_token, chat_id } = config else {
            return Err(wrong_config("Telegram", config));
        };
        if bot_token.is_empty() || chat_id.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Telegram bot token and chat ID are required".to_string(),
            ));
        }

        let api_url = format!("{}/bot{bot_token}/sendMessage", trim_base(&self.api_base));
        let text = Self::render(message);
        let payload = TelegramMessage {
            chat_id,
            text: &text,
            parse_mode: "MarkdownV2",
            disable_web_page_preview: true,
        };

        let response = self.client.post(&api_url).json(&payload).send().await?;
        ensure_success(response, "Telegram API").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_markdown_v2() {
        assert_eq!(
            TelegramSender::escape_markdown_v2("api.example.com (prod)!"),
            "api\\.example\\.com \\(prod\\)\\!"
        );
        assert_eq!(TelegramSender::escape_markdown_v2("plain"), "plain");
    }
}
