//! Database probes: connect, run a cheap statement, disconnect.
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use sqlx::{Connection, Executor, MySqlConnection, PgConnection};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;

use super::{with_timeout, CheckError, ProbeOutcome, ProbeResult};
use crate::service_monitor::models::DatabaseConfig;

const DEFAULT_QUERY: &str = "SELECT 1";

fn connection_string(config: &DatabaseConfig) -> Result<&str, CheckError> {
    config
        .database_connection_string
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CheckError::config("Database connection string is required"))
}

fn query_or_default(config: &DatabaseConfig) -> &str {
    config
        .database_query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .unwrap_or(DEFAULT_QUERY)
}

pub async fn check_postgres(config: &DatabaseConfig, timeout: Duration) -> ProbeResult {
    let url = connection_string(config)?;
    let query = query_or_default(config);
    with_timeout(timeout, async {
        let mut conn = PgConnection::connect(url)
            .await
            .map_err(|e| CheckError::Probe(format!("Connection failed: {e}")))?;
        let result = conn
            .execute(sqlx::raw_sql(query))
            .await
            .map_err(|e| CheckError::Probe(format!("Query failed: {e}")));
        let _ = conn.close().await;
        let result = result?;
        Ok(ProbeOutcome::up(format!(
            "Query OK, {} rows affected",
            result.rows_affected()
        )))
    })
    .await
}

pub async fn check_mysql(config: &DatabaseConfig, timeout: Duration) -> ProbeResult {
    let url = connection_string(config)?;
    let query = config
        .database_query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());
    with_timeout(timeout, async {
        let mut conn = MySqlConnection::connect(url)
            .await
            .map_err(|e| CheckError::Probe(format!("Connection failed: {e}")))?;
        let result = match query {
            Some(query) => conn
                .execute(sqlx::raw_sql(query))
                .await
                .map(|r| format!("Query OK, {} rows affected", r.rows_affected()))
                .map_err(|e| CheckError::Probe(format!("Query failed: {e}"))),
            None => conn
                .ping()
                .await
                .map(|_| "Ping OK".to_string())
                .map_err(|e| CheckError::Probe(format!("Ping failed: {e}"))),
        };
        let _ = conn.close().await;
        Ok(ProbeOutcome::up(result?))
    })
    .await
}

pub async fn check_sqlserver(config: &DatabaseConfig, timeout: Duration) -> ProbeResult {
    let ado = connection_string(config)?;
    let query = query_or_default(config);
    let tds_config = tiberius::Config::from_ado_string(ado)
        .map_err(|e| CheckError::config(format!("Invalid SQL Server connection string: {e}")))?;

    with_timeout(timeout, async {
        let tcp = TcpStream::connect(tds_config.get_addr())
            .await
            .map_err(|e| CheckError::Probe(format!("Connection failed: {e}")))?;
        tcp.set_nodelay(true).map_err(CheckError::probe)?;
        let mut client = tiberius::Client::connect(tds_config, tcp.compat_write())
            .await
            .map_err(|e| CheckError::Probe(format!("Login failed: {e}")))?;
        client
            .simple_query(query)
            .await
            .map_err(|e| CheckError::Probe(format!("Query failed: {e}")))?
            .into_results()
            .await
            .map_err(|e| CheckError::Probe(format!("Query failed: {e}")))?;
        let _ = client.close().await;
        Ok(ProbeOutcome::up("Query OK"))
    })
    .await
}

pub async fn check_mongodb(config: &DatabaseConfig, timeout: Duration) -> ProbeResult {
    let url = connection_string(config)?;
    with_timeout(timeout, async {
        let mut options = ClientOptions::parse(url)
            .await
            .map_err(|e| CheckError::Probe(format!("Invalid MongoDB connection string: {e}")))?;
        options.server_selection_timeout = Some(timeout);
        options.connect_timeout = Some(timeout);
        let client = mongodb::Client::with_options(options).map_err(CheckError::probe)?;
        let reply = client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| CheckError::Probe(format!("Ping failed: {e}")));
        client.shutdown().await;
        let reply = reply?;
        let ok = reply
            .get("ok")
            .and_then(|v| v.as_f64().or_else(|| v.as_i32().map(f64::from)))
            .unwrap_or(0.0);
        if ok >= 1.0 {
            Ok(ProbeOutcome::up("Ping OK"))
        } else {
            Ok(ProbeOutcome::down(format!("Unexpected ping reply: {reply}")))
        }
    })
    .await
}

pub async fn check_redis(config: &DatabaseConfig, timeout: Duration) -> ProbeResult {
    let url = config
        .redis_connection_string
        .as_deref()
        .or(config.database_connection_string.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CheckError::config("Redis connection string is required"))?;
    let client = redis::Client::open(url)
        .map_err(|e| CheckError::config(format!("Invalid Redis connection string: {e}")))?;

    with_timeout(timeout, async {
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CheckError::Probe(format!("Connection failed: {e}")))?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CheckError::Probe(format!("PING failed: {e}")))?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(ProbeOutcome::up("PONG"))
        } else {
            Ok(ProbeOutcome::down(format!("Unexpected PING reply: {reply}")))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_string_required() {
        let config = DatabaseConfig::default();
        for result in [
            check_postgres(&config, Duration::from_secs(1)).await,
            check_mysql(&config, Duration::from_secs(1)).await,
            check_sqlserver(&config, Duration::from_secs(1)).await,
            check_mongodb(&config, Duration::from_secs(1)).await,
        ] {
            assert_eq!(
                result.unwrap_err(),
                CheckError::Config("Database connection string is required".to_string())
            );
        }
        assert!(matches!(
            check_redis(&config, Duration::from_secs(1)).await,
            Err(CheckError::Config(_))
        ));
    }

    #[test]
    fn test_default_query() {
        let mut config = DatabaseConfig::default();
        assert_eq!(query_or_default(&config), "SELECT 1");
        config.database_query = Some("  SELECT version()  ".to_string());
        assert_eq!(query_or_default(&config), "SELECT version()");
    }

    #[tokio::test]
    async fn test_redis_unreachable_is_probe_error() {
        let config = DatabaseConfig {
            redis_connection_string: Some("redis://127.0.0.1:9".to_string()),
            ..DatabaseConfig::default()
        };
        let err = check_redis(&config, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, CheckError::Probe(_) | CheckError::Timeout(_)));
    }
}
