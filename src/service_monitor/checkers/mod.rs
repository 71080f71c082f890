//! Protocol probes. Every probe reports a [`ProbeOutcome`] or a [`CheckError`];
//! [`finalize`] turns either into the [`CheckResult`] that gets recorded.
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use super::models::{CheckResult, ConfigError, Monitor, MonitorStatus, TlsInfo};

pub mod browser;
pub mod database;
pub mod docker;
pub mod game;
pub mod grpc;
pub mod http;
pub mod message_queue;
pub mod network;
pub mod tls;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// The monitor cannot be checked as configured. Never inverted.
    #[error("{0}")]
    Config(String),
    /// The target could not be reached or answered garbage.
    #[error("{0}")]
    Probe(String),
    #[error("Timeout after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl From<ConfigError> for CheckError {
    fn from(e: ConfigError) -> Self {
        CheckError::Config(e.to_string())
    }
}

impl CheckError {
    pub fn probe(e: impl std::fmt::Display) -> Self {
        CheckError::Probe(e.to_string())
    }

    pub fn config(message: impl Into<String>) -> Self {
        CheckError::Config(message.into())
    }
}

/// What a probe observed, before upside-down mode is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub up: bool,
    pub message: String,
    /// Round-trip reported by the protocol itself. Falls back to wall time when absent.
    pub ping_ms: Option<u64>,
    pub tls_info: Option<TlsInfo>,
}

impl ProbeOutcome {
    pub fn up(message: impl Into<String>) -> Self {
        Self {
            up: true,
            message: message.into(),
            ping_ms: None,
            tls_info: None,
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            up: false,
            ..Self::up(message)
        }
    }

    pub fn with_ping(mut self, ping_ms: u64) -> Self {
        self.ping_ms = Some(ping_ms);
        self
    }

    pub fn with_tls(mut self, tls_info: Option<TlsInfo>) -> Self {
        self.tls_info = tls_info;
        self
    }
}

pub type ProbeResult = Result<ProbeOutcome, CheckError>;

/// Bounds a probe future by the monitor timeout.
pub async fn with_timeout<T, F>(timeout: Duration, future: F) -> Result<T, CheckError>
where
    F: Future<Output = Result<T, CheckError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(CheckError::Timeout(timeout)),
    }
}

/// Converts a probe verdict into a [`CheckResult`], applying upside-down mode.
pub fn finalize(monitor: &Monitor, result: ProbeResult, elapsed: Duration) -> CheckResult {
    let elapsed_ms = elapsed.as_millis() as u64;
    let (status, ping_ms, message, tls_info) = match result {
        Ok(outcome) => (
            if outcome.up {
                MonitorStatus::Up
            } else {
                MonitorStatus::Down
            },
            outcome.ping_ms.unwrap_or(elapsed_ms),
            outcome.message,
            outcome.tls_info,
        ),
        Err(CheckError::Config(message)) => {
            return CheckResult::down(0, message);
        }
        Err(e) => (MonitorStatus::Down, elapsed_ms, e.to_string(), None),
    };

    let status = if monitor.upside_down {
        status.inverted()
    } else {
        status
    };
    CheckResult {
        status,
        ping_ms,
        message,
        tls_info,
    }
}

/// `host:port`, bracketing bare IPv6 literals.
pub(crate) fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

pub(crate) fn require<'a>(value: &'a str, field: &str) -> Result<&'a str, CheckError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CheckError::config(format!("{field} is required")));
    }
    Ok(value)
}

pub(crate) fn require_port(port: Option<u16>, field: &str) -> Result<u16, CheckError> {
    match port {
        Some(port) if port > 0 => Ok(port),
        _ => Err(CheckError::config(format!("{field} is required"))),
    }
}

/// Keyword presence check shared by the http, grpc and browser probes.
/// Returns the verdict and the failure message when the verdict is down.
pub(crate) fn keyword_verdict(haystack: &str, keyword: &str, invert: bool) -> (bool, String) {
    let found = haystack.contains(keyword);
    match (found, invert) {
        (true, false) => (true, format!("keyword \"{keyword}\" found")),
        (false, true) => (true, format!("keyword \"{keyword}\" not found")),
        (false, false) => {
            let excerpt: String = haystack.chars().take(50).collect();
            (
                false,
                format!("Keyword \"{keyword}\" not found in [{}]", excerpt.trim()),
            )
        }
        (true, true) => (false, format!("Keyword \"{keyword}\" found but should be absent")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn monitor(upside_down: bool) -> Monitor {
        Monitor {
            id: 1,
            user_id: 1,
            name: "m".to_string(),
            monitor_type: "tcp".to_string(),
            active: true,
            interval_seconds: 60,
            timeout_seconds: 5,
            retry_interval_seconds: 10,
            max_retries: 0,
            upside_down,
            push_token: None,
            monitor_config: json!({}),
        }
    }

    #[test]
    fn test_finalize_plain() {
        let ok = finalize(&monitor(false), Ok(ProbeOutcome::up("fine")), Duration::from_millis(12));
        assert_eq!(ok.status, MonitorStatus::Up);
        assert_eq!(ok.ping_ms, 12);

        let rtt = finalize(
            &monitor(false),
            Ok(ProbeOutcome::up("pong").with_ping(3)),
            Duration::from_millis(40),
        );
        assert_eq!(rtt.ping_ms, 3);
    }

    #[test]
    fn test_finalize_upside_down_inverts_probe_failures_but_not_config_errors() {
        let m = monitor(true);

        let up = finalize(&m, Ok(ProbeOutcome::up("200")), Duration::ZERO);
        assert_eq!(up.status, MonitorStatus::Down);

        let refused = finalize(
            &m,
            Err(CheckError::Probe("Connection refused".to_string())),
            Duration::from_millis(2),
        );
        assert_eq!(refused.status, MonitorStatus::Up);
        assert_eq!(refused.message, "Connection refused");

        let timeout = finalize(&m, Err(CheckError::Timeout(Duration::from_secs(5))), Duration::ZERO);
        assert_eq!(timeout.status, MonitorStatus::Up);
        assert_eq!(timeout.message, "Timeout after 5s");

        let config = finalize(&m, Err(CheckError::config("Hostname is required")), Duration::ZERO);
        assert_eq!(config.status, MonitorStatus::Down);
        assert_eq!(config.ping_ms, 0);
    }

    #[test]
    fn test_keyword_verdict() {
        assert!(keyword_verdict("hello world", "world", false).0);
        assert!(!keyword_verdict("hello world", "world", true).0);
        assert!(keyword_verdict("hello", "world", true).0);
        let (up, message) = keyword_verdict("hello", "world", false);
        assert!(!up);
        assert!(message.contains("[hello]"));
    }

    #[test]
    fn test_host_port() {
        assert_eq!(host_port("example.com", 80), "example.com:80");
        assert_eq!(host_port("::1", 53), "[::1]:53");
        assert_eq!(host_port("[::1]", 53), "[::1]:53");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let result: Result<(), CheckError> = with_timeout(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(CheckError::Timeout(Duration::from_secs(1))));
    }
}
