//! Real-browser probe driven over the W3C WebDriver protocol.
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use super::{keyword_verdict, require, with_timeout, CheckError, ProbeOutcome, ProbeResult};
use crate::service_monitor::models::BrowserConfig;

const DEFAULT_REMOTE_BROWSER: &str = "http://localhost:4444";

#[derive(Debug, Deserialize)]
struct WebDriverReply {
    value: Value,
}

struct Session<'a> {
    client: &'a Client,
    base: &'a str,
    id: String,
}

impl<'a> Session<'a> {
    async fn create(client: &'a Client, base: &'a str) -> Result<Session<'a>, CheckError> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": ["--headless=new", "--no-sandbox"] }
                }
            }
        });
        let reply = call(client.post(format!("{base}/session")).json(&capabilities)).await?;
        let id = reply["sessionId"]
            .as_str()
            .ok_or_else(|| CheckError::Probe("WebDriver did not return a session id".to_string()))?
            .to_string();
        Ok(Session { client, base, id })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}/{path}", self.base, self.id)
    }

    async fn navigate(&self, url: &str) -> Result<(), CheckError> {
        call(self.client.post(self.url("url")).json(&json!({ "url": url }))).await?;
        Ok(())
    }

    async fn text(&self, path: &str) -> Result<String, CheckError> {
        let value = call(self.client.get(self.url(path))).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(self) {
        let url = format!("{}/session/{}", self.base, self.id);
        if let Err(e) = self.client.delete(url).send().await {
            warn!(session = %self.id, error = %e, "Failed to delete WebDriver session.");
        }
    }
}

async fn call(request: reqwest::RequestBuilder) -> Result<Value, CheckError> {
    let response = request
        .send()
        .await
        .map_err(|e| CheckError::Probe(format!("Remote browser unreachable: {e}")))?;
    let status = response.status();
    let reply: WebDriverReply = response
        .json()
        .await
        .map_err(|e| CheckError::Probe(format!("Invalid WebDriver response: {e}")))?;
    if !status.is_success() {
        let message = reply.value["message"]
            .as_str()
            .or_else(|| reply.value["error"].as_str())
            .unwrap_or("unknown error");
        return Err(CheckError::Probe(format!("WebDriver error: {message}")));
    }
    Ok(reply.value)
}

pub async fn check_browser(config: &BrowserConfig, timeout: Duration) -> ProbeResult {
    let url = require(&config.url, "URL")?;
    let base = config
        .remote_browser_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_REMOTE_BROWSER)
        .trim_end_matches('/');
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(CheckError::probe)?;

    let session = with_timeout(timeout, Session::create(&client, base)).await?;
    let result = with_timeout(timeout, async {
        session.navigate(url).await?;
        let title = session.text("title").await?;
        let source = match config.keyword.as_deref().filter(|k| !k.is_empty()) {
            Some(_) => Some(session.text("source").await?),
            None => None,
        };
        Ok((title, source))
    })
    .await;
    session.close().await;
    let (title, source) = result?;

    let label = if title.is_empty() { url.to_string() } else { title };
    match (config.keyword.as_deref().filter(|k| !k.is_empty()), source) {
        (Some(keyword), Some(source)) => {
            let (up, message) = keyword_verdict(&source, keyword, config.invert_keyword);
            if up {
                Ok(ProbeOutcome::up(format!("{label}, {message}")))
            } else {
                Ok(ProbeOutcome::down(message))
            }
        }
        _ => Ok(ProbeOutcome::up(format!("Page loaded: {label}"))),
    }
}
