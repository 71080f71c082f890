//! Monitor records, their parsed per-protocol configuration, and check results.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 48;
pub const DEFAULT_RETRY_INTERVAL_SECONDS: u64 = 60;

/// Every type string the dispatcher knows how to route.
pub const KNOWN_MONITOR_TYPES: &[&str] = &[
    "http",
    "keyword",
    "json-query",
    "grpc-keyword",
    "tcp",
    "ping",
    "dns",
    "push",
    "group",
    "docker",
    "mongodb",
    "mysql",
    "postgres",
    "sqlserver",
    "redis",
    "mqtt",
    "kafka",
    "rabbitmq",
    "steam",
    "gamedig",
    "radius",
    "tailscale-ping",
    "real-browser",
];

/// A configured monitor, as stored by the CRUD side of the application.
/// Corresponds to the `monitors` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub monitor_type: String, // e.g., "http", "tcp", "push"
    pub active: bool,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub retry_interval_seconds: i32,
    pub max_retries: i32,
    pub upside_down: bool,
    pub push_token: Option<String>,
    pub monitor_config: serde_json::Value, // protocol-specific fields, camelCase keys
}

fn positive_or(value: i32, default: u64) -> u64 {
    if value > 0 {
        value as u64
    } else {
        default
    }
}

impl Monitor {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(positive_or(self.interval_seconds, DEFAULT_INTERVAL_SECONDS))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(positive_or(self.timeout_seconds, DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(positive_or(
            self.retry_interval_seconds,
            DEFAULT_RETRY_INTERVAL_SECONDS,
        ))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.max(0) as u32
    }

    pub fn is_push(&self) -> bool {
        self.monitor_type == "push"
    }

    /// Best-effort human readable target, used in notifications.
    pub fn target_url(&self) -> Option<String> {
        let config = self.monitor_config.as_object()?;
        for key in ["url", "grpcUrl"] {
            if let Some(url) = config.get(key).and_then(|v| v.as_str()) {
                if !url.is_empty() {
                    return Some(url.to_string());
                }
            }
        }
        let hostname = config.get("hostname").and_then(|v| v.as_str())?;
        match config.get("port").and_then(|v| v.as_u64()) {
            Some(port) => Some(format!("{hostname}:{port}")),
            None => Some(hostname.to_string()),
        }
    }

    /// Parses the declared type and its config blob into a typed [`MonitorKind`].
    pub fn kind(&self) -> Result<MonitorKind, ConfigError> {
        if !KNOWN_MONITOR_TYPES.contains(&self.monitor_type.as_str()) {
            return Err(ConfigError::UnsupportedType(self.monitor_type.clone()));
        }

        let mut object = match &self.monitor_config {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            _ => {
                return Err(ConfigError::Invalid {
                    monitor_type: self.monitor_type.clone(),
                    reason: "monitor configuration must be a JSON object".to_string(),
                })
            }
        };
        object.insert(
            "type".to_string(),
            serde_json::Value::String(self.monitor_type.clone()),
        );

        serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
            ConfigError::Invalid {
                monitor_type: self.monitor_type.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported monitor type: {0}")]
    UnsupportedType(String),
    #[error("Invalid configuration for {monitor_type} monitor: {reason}")]
    Invalid { monitor_type: String, reason: String },
}

/// Heartbeat status codes. Serialized as the bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum MonitorStatus {
    Down = 0,
    Up = 1,
    Pending = 2,
    Maintenance = 3,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Down => "DOWN",
            MonitorStatus::Up => "UP",
            MonitorStatus::Pending => "PENDING",
            MonitorStatus::Maintenance => "MAINTENANCE",
        }
    }

    /// Flips UP and DOWN. Other states pass through untouched.
    pub fn inverted(self) -> Self {
        match self {
            MonitorStatus::Up => MonitorStatus::Down,
            MonitorStatus::Down => MonitorStatus::Up,
            other => other,
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MonitorStatus> for i16 {
    fn from(status: MonitorStatus) -> Self {
        status as i16
    }
}

impl TryFrom<i16> for MonitorStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MonitorStatus::Down),
            1 => Ok(MonitorStatus::Up),
            2 => Ok(MonitorStatus::Pending),
            3 => Ok(MonitorStatus::Maintenance),
            other => Err(format!("Unknown monitor status code: {other}")),
        }
    }
}

/// Certificate metadata collected alongside HTTPS checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsInfo {
    pub valid: bool,
    pub issuer: String,
    pub subject: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub days_remaining: i64,
    pub fingerprint: String,
    pub serial_number: String,
    pub subject_alt_names: Vec<String>,
}

/// The normalized outcome of one check invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: MonitorStatus,
    pub ping_ms: u64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_info: Option<TlsInfo>,
}

impl CheckResult {
    pub fn new(status: MonitorStatus, ping_ms: u64, message: impl Into<String>) -> Self {
        Self {
            status,
            ping_ms,
            message: message.into(),
            tls_info: None,
        }
    }

    pub fn up(ping_ms: u64, message: impl Into<String>) -> Self {
        Self::new(MonitorStatus::Up, ping_ms, message)
    }

    pub fn down(ping_ms: u64, message: impl Into<String>) -> Self {
        Self::new(MonitorStatus::Down, ping_ms, message)
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self::new(MonitorStatus::Pending, 0, message)
    }
}

// --- Per-kind configuration ---

/// Typed view of a monitor's declared type plus its config blob.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MonitorKind {
    Http(HttpConfig),
    Keyword(HttpConfig),
    JsonQuery(HttpConfig),
    GrpcKeyword(GrpcConfig),
    Tcp(HostPortConfig),
    Ping(HostPortConfig),
    Dns(DnsConfig),
    Push {},
    Group(GroupConfig),
    Docker(DockerConfig),
    Mongodb(DatabaseConfig),
    Mysql(DatabaseConfig),
    Postgres(DatabaseConfig),
    Sqlserver(DatabaseConfig),
    Redis(DatabaseConfig),
    Mqtt(MqttConfig),
    Kafka(KafkaConfig),
    Rabbitmq(RabbitMqConfig),
    Steam(HostPortConfig),
    Gamedig(GameConfig),
    Radius(RadiusConfig),
    TailscalePing(HostPortConfig),
    RealBrowser(BrowserConfig),
}

/// Request headers may be stored either as an object or as a JSON-encoded string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HeaderSpec {
    Map(HashMap<String, String>),
    Raw(String),
}

impl HeaderSpec {
    pub fn to_map(&self) -> Result<HashMap<String, String>, String> {
        match self {
            HeaderSpec::Map(map) => Ok(map.clone()),
            HeaderSpec::Raw(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            HeaderSpec::Raw(raw) => serde_json::from_str(raw)
                .map_err(|e| format!("Headers are not a valid JSON object: {e}")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
    pub url: String,
    pub method: Option<String>,
    pub headers: Option<HeaderSpec>,
    pub body: Option<String>,
    pub ignore_tls: bool,
    pub max_redirects: Option<usize>,
    pub proxy_url: Option<String>,
    pub auth_method: Option<String>, // "basic", "bearer", "oauth2-cc"
    pub basic_auth_user: Option<String>,
    pub basic_auth_pass: Option<String>,
    pub bearer_token: Option<String>,
    #[serde(rename = "oauth2TokenURL", alias = "oauth2TokenUrl")]
    pub oauth2_token_url: Option<String>,
    pub oauth2_client_id: Option<String>,
    pub oauth2_client_secret: Option<String>,
    pub oauth2_scope: Option<String>,
    pub accepted_statuscodes: Vec<String>,
    pub keyword: Option<String>,
    pub invert_keyword: bool,
    pub json_path: Option<String>,
    pub expected_value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostPortConfig {
    pub hostname: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DnsConfig {
    pub hostname: String,
    pub dns_resolve_type: Option<String>,
    pub dns_server: Option<String>,
    pub port: Option<u16>,
    pub dns_expected_result: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupConfig {
    pub children_ids: Vec<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockerConfig {
    pub docker_container: String,
    pub docker_host: Option<String>,
    pub docker_daemon: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub database_connection_string: Option<String>,
    pub redis_connection_string: Option<String>,
    pub database_query: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttConfig {
    pub hostname: String,
    pub port: Option<u16>,
    pub use_tls: bool,
    pub mqtt_topic: Option<String>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_success_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaConfig {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub kafka_brokers: Vec<String>,
    pub kafka_topic: Option<String>,
    pub kafka_sasl_mechanism: Option<String>,
    pub kafka_username: Option<String>,
    pub kafka_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RabbitMqConfig {
    pub database_connection_string: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub rabbitmq_username: Option<String>,
    pub rabbitmq_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    pub game: String,
    pub hostname: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RadiusConfig {
    pub hostname: String,
    pub port: Option<u16>,
    pub radius_secret: String,
    pub radius_username: Option<String>,
    pub radius_password: Option<String>,
    pub radius_called_station_id: Option<String>,
    pub radius_calling_station_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrpcConfig {
    pub grpc_url: String,
    pub grpc_service_name: Option<String>,
    pub grpc_enable_tls: bool,
    pub grpc_metadata: Option<HeaderSpec>,
    pub keyword: Option<String>,
    pub invert_keyword: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserConfig {
    pub url: String,
    pub remote_browser_url: Option<String>,
    pub keyword: Option<String>,
    pub invert_keyword: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn monitor(monitor_type: &str, config: serde_json::Value) -> Monitor {
        Monitor {
            id: 1,
            user_id: 1,
            name: "test".to_string(),
            monitor_type: monitor_type.to_string(),
            active: true,
            interval_seconds: 60,
            timeout_seconds: 5,
            retry_interval_seconds: 10,
            max_retries: 0,
            upside_down: false,
            push_token: None,
            monitor_config: config,
        }
    }

    #[test]
    fn test_kind_parses_kebab_case_types() {
        let m = monitor(
            "json-query",
            json!({ "url": "http://localhost", "jsonPath": "$.status", "expectedValue": "ok" }),
        );
        match m.kind().unwrap() {
            MonitorKind::JsonQuery(cfg) => {
                assert_eq!(cfg.url, "http://localhost");
                assert_eq!(cfg.json_path.as_deref(), Some("$.status"));
            }
            other => panic!("unexpected kind: {other:?}"),
        }

        let m = monitor("tailscale-ping", json!({ "hostname": "node-1" }));
        assert!(matches!(m.kind().unwrap(), MonitorKind::TailscalePing(_)));
    }

    #[test]
    fn test_kind_rejects_unknown_type() {
        let m = monitor("carrier-pigeon", json!({}));
        let err = m.kind().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported monitor type: carrier-pigeon");
    }

    #[test]
    fn test_kind_reports_invalid_config() {
        let m = monitor("tcp", json!({ "hostname": "localhost", "port": "not-a-port" }));
        let err = m.kind().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().starts_with("Invalid configuration for tcp monitor"));
    }

    #[test]
    fn test_push_and_null_config() {
        let m = monitor("push", serde_json::Value::Null);
        assert!(matches!(m.kind().unwrap(), MonitorKind::Push {}));
        assert!(m.is_push());
    }

    #[test]
    fn test_header_spec_accepts_string_and_object() {
        let m = monitor(
            "http",
            json!({ "url": "http://a", "headers": "{\"X-Test\":\"1\"}" }),
        );
        let MonitorKind::Http(cfg) = m.kind().unwrap() else {
            panic!("expected http kind");
        };
        let headers = cfg.headers.unwrap().to_map().unwrap();
        assert_eq!(headers.get("X-Test").map(String::as_str), Some("1"));

        let spec: HeaderSpec = serde_json::from_value(json!({ "A": "b" })).unwrap();
        assert_eq!(spec.to_map().unwrap().len(), 1);
    }

    #[test]
    fn test_durations_fall_back_to_defaults() {
        let mut m = monitor("tcp", json!({}));
        m.interval_seconds = 0;
        m.timeout_seconds = -1;
        m.retry_interval_seconds = 0;
        assert_eq!(m.interval(), Duration::from_secs(60));
        assert_eq!(m.timeout(), Duration::from_secs(48));
        assert_eq!(m.retry_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_status_serializes_as_integer() {
        assert_eq!(serde_json::to_value(MonitorStatus::Up).unwrap(), json!(1));
        let status: MonitorStatus = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(status, MonitorStatus::Maintenance);
        assert!(serde_json::from_value::<MonitorStatus>(json!(9)).is_err());
        assert_eq!(MonitorStatus::Up.inverted(), MonitorStatus::Down);
        assert_eq!(MonitorStatus::Pending.inverted(), MonitorStatus::Pending);
    }

    #[test]
    fn test_target_url() {
        let m = monitor("tcp", json!({ "hostname": "db.local", "port": 5432 }));
        assert_eq!(m.target_url().as_deref(), Some("db.local:5432"));
        let m = monitor("http", json!({ "url": "https://example.com" }));
        assert_eq!(m.target_url().as_deref(), Some("https://example.com"));
    }
}
