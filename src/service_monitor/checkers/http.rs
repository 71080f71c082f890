//! `http`, `keyword` and `json-query` probes.
use reqwest::{redirect, Client, Method, Response};
use serde::Deserialize;
use serde_json::Value;
use serde_json_path::JsonPath;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::tls::fetch_tls_info;
use super::{keyword_verdict, with_timeout, CheckError, ProbeOutcome, ProbeResult};
use crate::service_monitor::models::HttpConfig;

const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Which assertion runs on top of the status code check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    Status,
    Keyword,
    JsonQuery,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub async fn check_http(config: &HttpConfig, mode: HttpMode, timeout: Duration) -> ProbeResult {
    let url = reqwest::Url::parse(config.url.trim())
        .map_err(|e| CheckError::config(format!("Invalid URL '{}': {e}", config.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CheckError::config(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }
    let keyword = match mode {
        HttpMode::Keyword => Some(
            config
                .keyword
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| CheckError::config("Keyword is required for keyword monitors"))?,
        ),
        _ => None,
    };
    let json_path = match mode {
        HttpMode::JsonQuery => {
            let expression = config
                .json_path
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| CheckError::config("JSON path is required for json-query monitors"))?;
            Some(JsonPath::parse(expression).map_err(|e| {
                CheckError::config(format!("Invalid JSON path '{expression}': {e}"))
            })?)
        }
        _ => None,
    };

    let client = build_client(config, timeout)?;
    let response = with_timeout(timeout, send_request(&client, config, url.clone())).await?;

    let status = response.status();
    let status_message = format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );

    let tls_info = if url.scheme() == "https" {
        let host = url.host_str().unwrap_or_default().trim_matches(['[', ']']).to_string();
        let port = url.port_or_known_default().unwrap_or(443);
        match fetch_tls_info(&host, port, timeout).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(url = %url, error = %e, "Could not collect TLS certificate info.");
                None
            }
        }
    } else {
        None
    };

    if !status_accepted(status.as_u16(), &config.accepted_statuscodes) {
        return Ok(ProbeOutcome::down(status_message).with_tls(tls_info));
    }

    let outcome = match (keyword, json_path) {
        (Some(keyword), _) => {
            let body = read_body(response, timeout).await?;
            let (up, detail) = keyword_verdict(&body, keyword, config.invert_keyword);
            if up {
                ProbeOutcome::up(format!("{status_message}, {detail}"))
            } else {
                ProbeOutcome::down(detail)
            }
        }
        (None, Some(path)) => {
            let body = read_body(response, timeout).await?;
            let document: Value = serde_json::from_str(&body)
                .map_err(|e| CheckError::Probe(format!("Response is not valid JSON: {e}")))?;
            json_query_verdict(&document, &path, config.expected_value.as_deref(), config.invert_keyword)
        }
        (None, None) => ProbeOutcome::up(status_message),
    };
    Ok(outcome.with_tls(tls_info))
}

fn build_client(config: &HttpConfig, timeout: Duration) -> Result<Client, CheckError> {
    let max_redirects = config.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS);
    let policy = if max_redirects == 0 {
        redirect::Policy::none()
    } else {
        redirect::Policy::limited(max_redirects)
    };

    let mut builder = Client::builder()
        .timeout(timeout)
        .redirect(policy)
        .danger_accept_invalid_certs(config.ignore_tls)
        .user_agent(concat!("NodeNexus-Uptime/", env!("CARGO_PKG_VERSION")));
    if let Some(proxy_url) = config.proxy_url.as_deref().filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| CheckError::config(format!("Invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| CheckError::config(format!("Failed to build HTTP client: {e}")))
}

async fn send_request(client: &Client, config: &HttpConfig, url: reqwest::Url) -> Result<Response, CheckError> {
    let method_name = config.method.as_deref().unwrap_or("GET").to_uppercase();
    let method = Method::from_str(&method_name)
        .map_err(|_| CheckError::config(format!("Invalid HTTP method: {method_name}")))?;

    let mut request = client.request(method, url);

    if let Some(headers) = &config.headers {
        let headers = headers.to_map().map_err(CheckError::Config)?;
        for (name, value) in headers {
            request = request.header(name, value);
        }
    }

    if let Some(body) = config.body.as_deref().filter(|b| !b.is_empty()) {
        if serde_json::from_str::<Value>(body).is_ok() {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
        }
        request = request.body(body.to_string());
    }

    match config.auth_method.as_deref().unwrap_or("") {
        "basic" => {
            let user = config.basic_auth_user.as_deref().unwrap_or_default();
            request = request.basic_auth(user, config.basic_auth_pass.as_deref());
        }
        "bearer" => {
            if let Some(token) = config.bearer_token.as_deref() {
                request = request.bearer_auth(token);
            }
        }
        "oauth2-cc" => {
            let token = fetch_oauth2_token(client, config).await?;
            request = request.bearer_auth(token);
        }
        _ => {}
    }

    request.send().await.map_err(request_error)
}

/// Client-credentials grant against the configured token endpoint.
async fn fetch_oauth2_token(client: &Client, config: &HttpConfig) -> Result<String, CheckError> {
    let token_url = config
        .oauth2_token_url
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| CheckError::config("OAuth2 token URL is required"))?;

    let mut form = vec![("grant_type", "client_credentials")];
    if let Some(id) = config.oauth2_client_id.as_deref() {
        form.push(("client_id", id));
    }
    if let Some(secret) = config.oauth2_client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    if let Some(scope) = config.oauth2_scope.as_deref().filter(|s| !s.is_empty()) {
        form.push(("scope", scope));
    }

    let response = client
        .post(token_url)
        .form(&form)
        .send()
        .await
        .map_err(request_error)?;
    if !response.status().is_success() {
        return Err(CheckError::Probe(format!(
            "OAuth2 token request failed with HTTP {}",
            response.status().as_u16()
        )));
    }
    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| CheckError::Probe(format!("Invalid OAuth2 token response: {e}")))?;
    Ok(token.access_token)
}

async fn read_body(response: Response, timeout: Duration) -> Result<String, CheckError> {
    with_timeout(timeout, async { response.text().await.map_err(request_error) }).await
}

fn request_error(e: reqwest::Error) -> CheckError {
    if e.is_timeout() {
        CheckError::Probe("Request timed out".to_string())
    } else {
        // reqwest hides the root cause behind "error sending request"
        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            message = format!("{message}: {cause}");
            source = cause.source();
        }
        CheckError::Probe(message)
    }
}

/// Exact entries or `"lo-hi"` ranges. An empty list falls back to 200-399.
pub fn status_accepted(code: u16, accepted: &[String]) -> bool {
    let mut entries = accepted.iter().map(|e| e.trim()).filter(|e| !e.is_empty()).peekable();
    if entries.peek().is_none() {
        return (200..400).contains(&code);
    }
    entries.any(|entry| match entry.split_once('-') {
        Some((lo, hi)) => match (lo.trim().parse::<u16>(), hi.trim().parse::<u16>()) {
            (Ok(lo), Ok(hi)) => (lo..=hi).contains(&code),
            _ => false,
        },
        None => entry.parse::<u16>() == Ok(code),
    })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compares the first match of `path` against `expected`.
pub fn json_query_verdict(
    document: &Value,
    path: &JsonPath,
    expected: Option<&str>,
    invert: bool,
) -> ProbeOutcome {
    // a blank expectation only asserts that the path matched
    let expected = expected.filter(|v| !v.trim().is_empty());
    let Some(actual) = path.query(document).first().map(value_to_text) else {
        return if invert {
            ProbeOutcome::up("JSON Query Result: no match")
        } else {
            ProbeOutcome::down("JSON query returned no result")
        };
    };

    let matched = match expected {
        None => true,
        Some(expected) => match (expected.trim().parse::<f64>(), actual.trim().parse::<f64>()) {
            (Ok(e), Ok(a)) => e == a,
            _ => expected == actual,
        },
    };

    if matched != invert {
        ProbeOutcome::up(format!("JSON Query Result: {actual}"))
    } else {
        ProbeOutcome::down(format!(
            "Expected: {}{}, Got: {actual}",
            if invert { "not " } else { "" },
            expected.unwrap_or("any value")
        ))
    }
}
