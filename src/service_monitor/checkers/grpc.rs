use std::time::Duration;
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::transport::{ClientTlsConfig, Endpoint};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use super::{keyword_verdict, require, with_timeout, CheckError, ProbeOutcome, ProbeResult};
use crate::service_monitor::models::GrpcConfig;

fn endpoint_uri(config: &GrpcConfig) -> Result<String, CheckError> {
    let raw = require(&config.grpc_url, "gRPC URL")?;
    if raw.contains("://") {
        return Ok(raw.to_string());
    }
    let scheme = if config.grpc_enable_tls { "https" } else { "http" };
    Ok(format!("{scheme}://{raw}"))
}

fn build_request(config: &GrpcConfig) -> Result<tonic::Request<HealthCheckRequest>, CheckError> {
    let mut request = tonic::Request::new(HealthCheckRequest {
        service: config.grpc_service_name.clone().unwrap_or_default(),
    });
    if let Some(metadata) = &config.grpc_metadata {
        let entries = metadata.to_map().map_err(CheckError::Config)?;
        for (name, value) in entries {
            let key = MetadataKey::<Ascii>::from_bytes(name.to_lowercase().as_bytes())
                .map_err(|_| CheckError::config(format!("Invalid gRPC metadata key: {name}")))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|_| CheckError::config(format!("Invalid gRPC metadata value for {name}")))?;
            request.metadata_mut().insert(key, value);
        }
    }
    Ok(request)
}

pub async fn check_grpc(config: &GrpcConfig, timeout: Duration) -> ProbeResult {
    let uri = endpoint_uri(config)?;
    let mut endpoint = Endpoint::from_shared(uri.clone())
        .map_err(|e| CheckError::config(format!("Invalid gRPC URL {uri}: {e}")))?
        .connect_timeout(timeout)
        .timeout(timeout);
    if config.grpc_enable_tls || uri.starts_with("https://") {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new().with_native_roots())
            .map_err(|e| CheckError::config(format!("Invalid gRPC TLS configuration: {e}")))?;
    }
    let request = build_request(config)?;

    let status = with_timeout(timeout, async {
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| CheckError::Probe(format!("gRPC connection failed: {e}")))?;
        let response = HealthClient::new(channel)
            .check(request)
            .await
            .map_err(|status| {
                CheckError::Probe(format!(
                    "gRPC health check failed: {:?} {}",
                    status.code(),
                    status.message()
                ))
            })?;
        Ok(response.into_inner().status)
    })
    .await?;

    let status = ServingStatus::try_from(status).unwrap_or(ServingStatus::Unknown);
    Ok(serving_verdict(
        status,
        config.keyword.as_deref().filter(|k| !k.is_empty()),
        config.invert_keyword,
    ))
}

fn serving_verdict(status: ServingStatus, keyword: Option<&str>, invert: bool) -> ProbeOutcome {
    let name = status.as_str_name();
    if let Some(keyword) = keyword {
        let (up, message) = keyword_verdict(name, keyword, invert);
        return if up {
            ProbeOutcome::up(format!("{name}, {message}"))
        } else {
            ProbeOutcome::down(message)
        };
    }
    match status {
        ServingStatus::Serving => ProbeOutcome::up(name),
        _ => ProbeOutcome::down(format!("Service is {name}")),
    }
}
