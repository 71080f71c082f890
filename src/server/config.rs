use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// PostgreSQL URL. Without it the engine runs on the in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_notification_key")]
    pub notification_encryption_key: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// 0 disables retention.
    #[serde(default = "default_heartbeat_retention_days")]
    pub heartbeat_retention_days: u32,

    #[serde(default = "default_notification_timeout_seconds")]
    pub notification_timeout_seconds: u64,

    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    listen_address: Option<String>,
    database_url: Option<String>,
    notification_encryption_key: Option<String>,
    log_dir: Option<String>,
    heartbeat_retention_days: Option<u32>,
    notification_timeout_seconds: Option<u64>,
    broadcast_capacity: Option<usize>,
}

fn default_listen_address() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_heartbeat_retention_days() -> u32 {
    180
}

fn default_notification_timeout_seconds() -> u64 {
    10
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_notification_key() -> String {
    // Development key only; override it in production.
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = match config_path.map(Path::new) {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            }
            _ => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        Ok(Self::merge(env_config, file_config))
    }

    // environment overrides file
    fn merge(env_config: PartialServerConfig, file_config: PartialServerConfig) -> Self {
        ServerConfig {
            listen_address: env_config
                .listen_address
                .or(file_config.listen_address)
                .unwrap_or_else(default_listen_address),
            database_url: env_config
                .database_url
                .or(file_config.database_url)
                .filter(|url| !url.trim().is_empty()),
            notification_encryption_key: env_config
                .notification_encryption_key
                .or(file_config.notification_encryption_key)
                .unwrap_or_else(default_notification_key),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
            heartbeat_retention_days: env_config
                .heartbeat_retention_days
                .or(file_config.heartbeat_retention_days)
                .unwrap_or_else(default_heartbeat_retention_days),
            notification_timeout_seconds: env_config
                .notification_timeout_seconds
                .or(file_config.notification_timeout_seconds)
                .unwrap_or_else(default_notification_timeout_seconds),
            broadcast_capacity: env_config
                .broadcast_capacity
                .or(file_config.broadcast_capacity)
                .unwrap_or_else(default_broadcast_capacity)
                .max(1),
        }
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn from_file(contents: &str) -> PartialServerConfig {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::merge(PartialServerConfig::default(), PartialServerConfig::default());
        assert_eq!(config.listen_address, "0.0.0.0:3001");
        assert!(config.database_url.is_none());
        assert_eq!(config.heartbeat_retention_days, 180);
        assert_eq!(config.notification_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = from_file(
            r#"
            listen_address = "127.0.0.1:9000"
            log_dir = "/var/log/uptime"
            heartbeat_retention_days = 30
            database_url = ""
            "#,
        );
        let env = PartialServerConfig {
            listen_address: Some("127.0.0.1:9100".to_string()),
            ..PartialServerConfig::default()
        };
        let config = ServerConfig::merge(env, file);
        assert_eq!(config.listen_address, "127.0.0.1:9100");
        assert_eq!(config.log_dir, "/var/log/uptime");
        assert_eq!(config.heartbeat_retention_days, 30);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = ServerConfig::load(Some("/nonexistent/uptime.toml")).unwrap();
        assert!(config.broadcast_capacity >= 1);
    }
}
