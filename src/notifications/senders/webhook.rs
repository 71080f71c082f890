use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde_json::json;
use tera::{Context, Tera};

use super::{ensure_success, wrong_config, NotificationSender, SenderError};
use crate::notifications::models::{ChannelConfig, NotificationMessage};

/// A sender for pushing notifications via a custom webhook.
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn render_body(template: &str, message: &NotificationMessage) -> Result<String, SenderError> {
        let mut tera_context = Context::new();
        for (key, value) in message.template_context() {
            tera_context.insert(key, &value);
        }
        // camelCase spellings used by older templates
        tera_context.insert("monitorName", &message.monitor_name);
        tera_context.insert("monitorUrl", &message.monitor_url.clone().unwrap_or_default());

        Tera::one_off(template, &tera_context, false)
            .map_err(|e| SenderError::TemplatingError(e.to_string()))
    }

    fn default_body(message: &NotificationMessage) -> String {
        json!({
            "title": message.title,
            "body": message.body,
            "monitor": {
                "name": message.monitor_name,
                "url": message.monitor_url,
            },
            "status": message.status_label(),
            "ping": message.ping_ms,
            "time": message.time_rfc3339(),
        })
        .to_string()
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &NotificationMessage,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Webhook {
            url,
            method,
            headers,
            body_template,
        } = config
        else {
            return Err(wrong_config("Webhook", config));
        };
        if url.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Webhook URL is required".to_string(),
            ));
        }

        let method = method.as_deref().unwrap_or("POST").to_uppercase();
        let http_method = match method.as_str() {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "GET" => Method::GET,
            _ => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {method}"
                )));
            }
        };

        let mut request_builder = self.client.request(http_method.clone(), url);

        if let Some(h) = headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in h {
                let header_name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header name: {e}"))
                })?;
                let header_value = header::HeaderValue::from_str(value).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header value: {e}"))
                })?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        if http_method != Method::GET {
            let rendered_body = match body_template.as_deref() {
                Some(template) if !template.trim().is_empty() => {
                    Self::render_body(template, message)?
                }
                _ => Self::default_body(message),
            };
            let has_content_type = headers
                .as_ref()
                .is_some_and(|h| h.keys().any(|k| k.eq_ignore_ascii_case("content-type")));
            if !has_content_type {
                request_builder = request_builder.header(header::CONTENT_TYPE, "application/json");
            }
            request_builder = request_builder.body(rendered_body);
        }

        let response = request_builder.send().await?;
        ensure_success(response, "Webhook").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_monitor::models::MonitorStatus;
    use chrono::Utc;
    use wiremock::matchers::{body_json, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> NotificationMessage {
        NotificationMessage {
            title: "🔴 API is DOWN".to_string(),
            body: "HTTP 503 - Service Unavailable".to_string(),
            monitor_name: "API".to_string(),
            monitor_url: Some("https://api.example.com".to_string()),
            status: MonitorStatus::Down,
            previous_status: Some(MonitorStatus::Up),
            ping_ms: 42,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_render_body_template() {
        let rendered = WebhookSender::render_body(
            r#"{"text":"{{ title }}","name":"{{monitorName}}","ping":{{ ping }}}"#,
            &message(),
        )
        .unwrap();
        assert_eq!(rendered, r#"{"text":"🔴 API is DOWN","name":"API","ping":42}"#);
    }

    #[test]
    fn test_render_body_reports_template_errors() {
        let err = WebhookSender::render_body("{{ unclosed", &message()).unwrap_err();
        assert!(matches!(err, SenderError::TemplatingError(_)));
    }

    #[tokio::test]
    async fn test_send_posts_rendered_template_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_matcher("x-api-key", "secret"))
            .and(body_json(json!({ "status": "down", "monitor": "API" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = ChannelConfig::Webhook {
            url: format!("{}/hook", server.uri()),
            method: None,
            headers: Some([("x-api-key".to_string(), "secret".to_string())].into()),
            body_template: Some(r#"{"status":"{{ status }}","monitor":"{{ monitor_name }}"}"#.to_string()),
        };

        WebhookSender::new(Client::new())
            .send(&config, &message())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let config = ChannelConfig::Webhook {
            url: server.uri(),
            method: Some("post".to_string()),
            headers: None,
            body_template: None,
        };
        let err = WebhookSender::new(Client::new())
            .send(&config, &message())
            .await
            .unwrap_err();
        match err {
            SenderError::SendFailed(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_unsupported_method() {
        let config = ChannelConfig::Webhook {
            url: "http://localhost".to_string(),
            method: Some("PATCH".to_string()),
            headers: None,
            body_template: None,
        };
        let err = WebhookSender::new(Client::new())
            .send(&config, &message())
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }
}
