use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;

use super::{wrong_config, NotificationSender, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

/// Sends plain-text notification mails over SMTP.
/// A transport is built per send since every channel carries its own server.
pub struct EmailSender {
    timeout: Duration,
}

impl EmailSender {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_transport(
        &self,
        host: &str,
        port: Option<u16>,
        secure: bool,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, SenderError> {
        let mut builder = if secure {
            // implicit TLS, port 465 unless overridden
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| SenderError::EmailError(e.to_string()))?
        } else {
            let parameters = TlsParameters::new(host.to_string())
                .map_err(|e| SenderError::EmailError(e.to_string()))?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(587)
                .tls(Tls::Opportunistic(parameters))
        };

        if let Some(port) = port {
            builder = builder.port(port);
        }
        if let Some(username) = username.filter(|u| !u.is_empty()) {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                password.unwrap_or_default().to_string(),
            ));
        }
        Ok(builder.timeout(Some(self.timeout)).build())
    }
}

/// Builds the mail itself. `to_email` may hold several comma separated addresses.
fn build_message(
    from_email: &str,
    to_email: &str,
    message: &NotificationMessage,
) -> Result<Message, SenderError> {
    let from: Mailbox = from_email
        .parse()
        .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid sender address: {e}")))?;

    let mut builder = Message::builder().from(from).subject(message.title.clone());
    let mut recipients = 0;
    for address in to_email.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        let mailbox: Mailbox = address.parse().map_err(|e| {
            SenderError::InvalidConfiguration(format!("Invalid recipient address '{address}': {e}"))
        })?;
        builder = builder.to(mailbox);
        recipients += 1;
    }
    if recipients == 0 {
        return Err(SenderError::InvalidConfiguration(
            "At least one recipient address is required".to_string(),
        ));
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(format!("{}\n\nTime: {}", message.plain_text(), message.time_rfc3339()))
        .map_err(|e| SenderError::EmailError(e.to_string()))
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Email {
            smtp_host,
            smtp_port,
            smtp_secure,
            smtp_username,
            smtp_password,
            from_email,
            to_email,
        } = config
        else {
            return Err(wrong_config("Email", config));
        };
        if smtp_host.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "SMTP host is required".to_string(),
            ));
        }

        let email = build_message(from_email, to_email, message)?;
        let transport = self.build_transport(
            smtp_host,
            *smtp_port,
            *smtp_secure,
            smtp_username.as_deref(),
            smtp_password.as_deref(),
        )?;

        transport
            .send(email)
            .await
            .map_err(|e| SenderError::EmailError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_monitor::models::MonitorStatus;
    use chrono::Utc;

    fn message() -> NotificationMessage {
        NotificationMessage {
            title: "DB is DOWN".to_string(),
            body: "connection refused".to_string(),
            monitor_name: "DB".to_string(),
            monitor_url: None,
            status: MonitorStatus::Down,
            previous_status: Some(MonitorStatus::Up),
            ping_ms: 0,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_build_message_with_multiple_recipients() {
        let email = build_message(
            "Uptime <uptime@example.com>",
            "ops@example.com, oncall@example.com",
            &message(),
        )
        .unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: DB is DOWN"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("oncall@example.com"));
        assert!(raw.contains("connection refused"));
    }

    #[test]
    fn test_build_message_rejects_bad_addresses() {
        assert!(matches!(
            build_message("not an address", "ops@example.com", &message()),
            Err(SenderError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            build_message("uptime@example.com", " , ", &message()),
            Err(SenderError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_missing_host() {
        let sender = EmailSender::new(Duration::from_secs(1));
        let config = ChannelConfig::Email {
            smtp_host: String::new(),
            smtp_port: None,
            smtp_secure: false,
            smtp_username: None,
            smtp_password: None,
            from_email: "a@example.com".to_string(),
            to_email: "b@example.com".to_string(),
        };
        assert!(sender.send(&config, &message()).await.is_err());
    }
}
