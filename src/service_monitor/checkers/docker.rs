//! Container state through the Docker Engine API.
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{require, with_timeout, CheckError, ProbeOutcome, ProbeResult};
use crate::service_monitor::models::DockerConfig;

const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    status: String,
}

enum DaemonAddress {
    Socket(String),
    Http(String),
}

fn daemon_address(config: &DockerConfig) -> DaemonAddress {
    let raw = config
        .docker_host
        .as_deref()
        .or(config.docker_daemon.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_DOCKER_SOCKET);

    if let Some(rest) = raw.strip_prefix("tcp://") {
        DaemonAddress::Http(format!("http://{}", rest.trim_end_matches('/')))
    } else if raw.starts_with("http://") || raw.starts_with("https://") {
        DaemonAddress::Http(raw.trim_end_matches('/').to_string())
    } else {
        DaemonAddress::Socket(raw.strip_prefix("unix://").unwrap_or(raw).to_string())
    }
}

#[cfg(unix)]
async fn get_over_socket(socket_path: &str, path: &str) -> Result<(u16, Bytes), CheckError> {
    use hyper_util::rt::TokioIo;
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| CheckError::Probe(format!("Cannot connect to Docker socket {socket_path}: {e}")))?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(CheckError::probe)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Docker socket connection closed with error.");
        }
    });

    let request = hyper::Request::builder()
        .uri(path)
        .header(hyper::header::HOST, "docker")
        .body(Empty::<Bytes>::new())
        .map_err(CheckError::probe)?;
    let response = sender.send_request(request).await.map_err(CheckError::probe)?;
    let status = response.status().as_u16();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(CheckError::probe)?
        .to_bytes();
    Ok((status, body))
}

#[cfg(not(unix))]
async fn get_over_socket(socket_path: &str, _path: &str) -> Result<(u16, Bytes), CheckError> {
    Err(CheckError::config(format!(
        "Unix socket {socket_path} is not supported on this platform"
    )))
}

async fn get_over_http(base: &str, path: &str, timeout: Duration) -> Result<(u16, Bytes), CheckError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(CheckError::probe)?;
    let response = client
        .get(format!("{base}{path}"))
        .send()
        .await
        .map_err(|e| CheckError::Probe(format!("Docker daemon request failed: {e}")))?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(CheckError::probe)?;
    Ok((status, body))
}

pub async fn check_docker(config: &DockerConfig, timeout: Duration) -> ProbeResult {
    let container = require(&config.docker_container, "Container name or ID")?;
    let path = format!("/containers/{}/json", urlencoding::encode(container));

    let (status, body) = with_timeout(timeout, async {
        match daemon_address(config) {
            DaemonAddress::Socket(socket) => get_over_socket(&socket, &path).await,
            DaemonAddress::Http(base) => get_over_http(&base, &path, timeout).await,
        }
    })
    .await?;

    container_verdict(status, &body)
}

fn container_verdict(status: u16, body: &[u8]) -> ProbeResult {
    match status {
        200 => {}
        404 => return Ok(ProbeOutcome::down("Container not found")),
        other => {
            return Err(CheckError::Probe(format!(
                "Docker API returned HTTP {other}: {}",
                String::from_utf8_lossy(body).trim()
            )))
        }
    }

    let inspect: ContainerInspect = serde_json::from_slice(body)
        .map_err(|e| CheckError::Probe(format!("Unexpected Docker API response: {e}")))?;
    let state = inspect.state;
    if !state.running {
        return Ok(ProbeOutcome::down(format!("Container is {}", state.status)));
    }
    match state.health {
        Some(health) if health.status == "unhealthy" => {
            Ok(ProbeOutcome::down("Container is running but unhealthy"))
        }
        Some(health) => Ok(ProbeOutcome::up(format!("Container is running ({})", health.status))),
        None => Ok(ProbeOutcome::up("Container is running")),
    }
}
