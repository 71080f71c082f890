//! Network level probes: tcp, ping, dns, radius and tailscale-ping.
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use rand::random;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::process::Command;

use super::{host_port, require, require_port, with_timeout, CheckError, ProbeOutcome, ProbeResult};
use crate::service_monitor::models::{DnsConfig, HostPortConfig, RadiusConfig};

const DEFAULT_DNS_PORT: u16 = 53;
const DEFAULT_RADIUS_PORT: u16 = 1812;

pub async fn check_tcp(config: &HostPortConfig, timeout: Duration) -> ProbeResult {
    let hostname = require(&config.hostname, "Hostname")?;
    let port = require_port(config.port, "Port")?;

    let started = Instant::now();
    with_timeout(timeout, async {
        TcpStream::connect(host_port(hostname, port))
            .await
            .map_err(|e| CheckError::Probe(format!("Connection failed: {e}")))
    })
    .await?;
    let elapsed = started.elapsed().as_millis() as u64;
    Ok(ProbeOutcome::up(format!("Connected to {hostname}:{port}")).with_ping(elapsed))
}

async fn resolve_ip(hostname: &str) -> Result<IpAddr, CheckError> {
    if let Ok(ip) = hostname.trim_matches(['[', ']']).parse::<IpAddr>() {
        return Ok(ip);
    }
    lookup_host(host_port(hostname, 0))
        .await
        .map_err(|e| CheckError::Probe(format!("Failed to resolve {hostname}: {e}")))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| CheckError::Probe(format!("No addresses found for {hostname}")))
}

pub async fn check_ping(config: &HostPortConfig, timeout: Duration) -> ProbeResult {
    let hostname = require(&config.hostname, "Hostname")?;
    let target = with_timeout(timeout, resolve_ip(hostname)).await?;

    let ping_config = match target {
        IpAddr::V4(_) => surge_ping::Config::default(),
        IpAddr::V6(_) => surge_ping::Config::builder()
            .kind(surge_ping::ICMP::V6)
            .build(),
    };
    let client = surge_ping::Client::new(&ping_config)
        .map_err(|e| CheckError::Probe(format!("Cannot open ICMP socket: {e}")))?;
    let mut pinger = client
        .pinger(target, surge_ping::PingIdentifier(random()))
        .await;
    pinger.timeout(timeout);

    match pinger.ping(surge_ping::PingSequence(0), &[0; 8]).await {
        Ok((_packet, rtt)) => {
            let rtt_ms = rtt.as_millis() as u64;
            Ok(ProbeOutcome::up(format!("{rtt_ms} ms")).with_ping(rtt_ms))
        }
        Err(surge_ping::SurgeError::Timeout { .. }) => Err(CheckError::Timeout(timeout)),
        Err(e) => Err(CheckError::Probe(format!("Ping failed: {e}"))),
    }
}

fn build_resolver(config: &DnsConfig, timeout: Duration) -> Result<TokioAsyncResolver, CheckError> {
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    opts.cache_size = 0;

    match config.dns_server.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(server) => {
            let ip = server
                .parse::<IpAddr>()
                .map_err(|_| CheckError::config(format!("Invalid DNS server address: {server}")))?;
            let port = config.port.filter(|p| *p > 0).unwrap_or(DEFAULT_DNS_PORT);
            let group = NameServerConfigGroup::from_ips_clear(&[ip], port, true);
            Ok(TokioAsyncResolver::tokio(
                ResolverConfig::from_parts(None, vec![], group),
                opts,
            ))
        }
        None => TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| CheckError::Probe(format!("Cannot read system resolver config: {e}"))),
    }
}

pub async fn check_dns(config: &DnsConfig, timeout: Duration) -> ProbeResult {
    let hostname = require(&config.hostname, "Hostname")?;
    let type_name = config
        .dns_resolve_type
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or("A")
        .to_uppercase();
    let record_type = RecordType::from_str(&type_name)
        .map_err(|_| CheckError::config(format!("Unsupported DNS record type: {type_name}")))?;
    let resolver = build_resolver(config, timeout)?;

    let records: Vec<String> = with_timeout(timeout, async {
        match (record_type, hostname.parse::<IpAddr>()) {
            (RecordType::PTR, Ok(ip)) => resolver
                .reverse_lookup(ip)
                .await
                .map(|lookup| lookup.iter().map(|name| name.to_string()).collect())
                .map_err(|e| CheckError::Probe(format!("DNS lookup failed: {e}"))),
            _ => resolver
                .lookup(hostname, record_type)
                .await
                .map(|lookup| lookup.iter().map(|rdata| rdata.to_string()).collect())
                .map_err(|e| CheckError::Probe(format!("DNS lookup failed: {e}"))),
        }
    })
    .await?;

    dns_verdict(&type_name, &records, config.dns_expected_result.as_deref())
}

fn dns_verdict(type_name: &str, records: &[String], expected: Option<&str>) -> ProbeResult {
    if records.is_empty() {
        return Ok(ProbeOutcome::down(format!("No {type_name} records found")));
    }
    let joined = records.join(", ");
    match expected.map(str::trim).filter(|e| !e.is_empty()) {
        Some(expected) if !records.iter().any(|r| r.contains(expected)) => Ok(ProbeOutcome::down(
            format!("Expected \"{expected}\" not found in {type_name} records: {joined}"),
        )),
        _ => Ok(ProbeOutcome::up(format!("{type_name} records: {joined}"))),
    }
}

pub async fn check_tailscale_ping(config: &HostPortConfig, timeout: Duration) -> ProbeResult {
    let hostname = require(&config.hostname, "Hostname")?;
    let output = with_timeout(timeout, async {
        Command::new("tailscale")
            .arg("ping")
            .arg("--c")
            .arg("1")
            .arg("--timeout")
            .arg(format!("{}s", timeout.as_secs().max(1)))
            .arg(hostname)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CheckError::Probe(format!("Failed to run tailscale: {e}")))
    })
    .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
        return Err(CheckError::Probe(format!("tailscale ping failed: {detail}")));
    }
    match parse_tailscale_latency(&stdout) {
        Some(ms) => Ok(ProbeOutcome::up(stdout.trim().to_string()).with_ping(ms)),
        None => Err(CheckError::Probe(format!(
            "Unexpected tailscale output: {}",
            stdout.trim()
        ))),
    }
}

/// Extracts the latency from `pong from node (100.64.0.1) via DERP(fra) in 45ms`.
pub fn parse_tailscale_latency(output: &str) -> Option<u64> {
    output
        .lines()
        .filter(|line| line.starts_with("pong"))
        .find_map(|line| {
            let (_, tail) = line.rsplit_once(" in ")?;
            let value = tail.trim().strip_suffix("ms")?;
            value.trim().parse::<f64>().ok().map(|ms| ms.round() as u64)
        })
}

// --- RADIUS ---

const RADIUS_ACCESS_REQUEST: u8 = 1;
const RADIUS_ACCESS_ACCEPT: u8 = 2;
const RADIUS_ACCESS_REJECT: u8 = 3;
const RADIUS_ACCESS_CHALLENGE: u8 = 11;

const ATTR_USER_NAME: u8 = 1;
const ATTR_USER_PASSWORD: u8 = 2;
const ATTR_CALLED_STATION_ID: u8 = 30;
const ATTR_CALLING_STATION_ID: u8 = 31;

/// RFC 2865 User-Password hiding.
fn hide_password(password: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let mut padded = password.to_vec();
    let padded_len = padded.len().div_ceil(16).max(1) * 16;
    padded.resize(padded_len, 0);

    let mut hidden = Vec::with_capacity(padded_len);
    let mut previous: Vec<u8> = authenticator.to_vec();
    for chunk in padded.chunks(16) {
        let mut context = md5::Context::new();
        context.consume(secret);
        context.consume(&previous);
        let digest = context.compute();
        let block: Vec<u8> = chunk.iter().zip(digest.iter()).map(|(p, d)| p ^ d).collect();
        hidden.extend_from_slice(&block);
        previous = block;
    }
    hidden
}

fn push_attribute(packet: &mut Vec<u8>, kind: u8, value: &[u8]) {
    let value = &value[..value.len().min(253)];
    packet.push(kind);
    packet.push((value.len() + 2) as u8);
    packet.extend_from_slice(value);
}

pub fn build_access_request(
    config: &RadiusConfig,
    identifier: u8,
    authenticator: &[u8; 16],
) -> Vec<u8> {
    let mut attributes = Vec::new();
    let username = config.radius_username.as_deref().unwrap_or_default();
    let password = config.radius_password.as_deref().unwrap_or_default();
    push_attribute(&mut attributes, ATTR_USER_NAME, username.as_bytes());
    push_attribute(
        &mut attributes,
        ATTR_USER_PASSWORD,
        &hide_password(password.as_bytes(), config.radius_secret.as_bytes(), authenticator),
    );
    if let Some(id) = config.radius_called_station_id.as_deref().filter(|s| !s.is_empty()) {
        push_attribute(&mut attributes, ATTR_CALLED_STATION_ID, id.as_bytes());
    }
    if let Some(id) = config.radius_calling_station_id.as_deref().filter(|s| !s.is_empty()) {
        push_attribute(&mut attributes, ATTR_CALLING_STATION_ID, id.as_bytes());
    }

    let length = (20 + attributes.len()) as u16;
    let mut packet = Vec::with_capacity(length as usize);
    packet.push(RADIUS_ACCESS_REQUEST);
    packet.push(identifier);
    packet.extend_from_slice(&length.to_be_bytes());
    packet.extend_from_slice(authenticator);
    packet.extend_from_slice(&attributes);
    packet
}

/// Checks identifier, length and the response authenticator. Returns the reply code.
pub fn verify_response(
    response: &[u8],
    identifier: u8,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<u8, CheckError> {
    if response.len() < 20 {
        return Err(CheckError::Probe("RADIUS reply too short".to_string()));
    }
    let length = u16::from_be_bytes([response[2], response[3]]) as usize;
    if length < 20 || length > response.len() {
        return Err(CheckError::Probe("RADIUS reply has an invalid length".to_string()));
    }
    if response[1] != identifier {
        return Err(CheckError::Probe("RADIUS reply identifier mismatch".to_string()));
    }

    let mut context = md5::Context::new();
    context.consume(&response[0..4]);
    context.consume(request_authenticator);
    context.consume(&response[20..length]);
    context.consume(secret);
    if context.compute().0 != response[4..20] {
        return Err(CheckError::Probe(
            "RADIUS reply authenticator mismatch (wrong secret?)".to_string(),
        ));
    }
    Ok(response[0])
}

pub async fn check_radius(config: &RadiusConfig, timeout: Duration) -> ProbeResult {
    let hostname = require(&config.hostname, "Hostname")?;
    require(&config.radius_secret, "RADIUS secret")?;
    let port = config.port.filter(|p| *p > 0).unwrap_or(DEFAULT_RADIUS_PORT);

    let identifier: u8 = random();
    let authenticator: [u8; 16] = random();
    let request = build_access_request(config, identifier, &authenticator);

    let response = with_timeout(timeout, async {
        let target = resolve_ip(hostname).await?;
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(CheckError::probe)?;
        socket
            .connect((target, port))
            .await
            .map_err(CheckError::probe)?;
        socket.send(&request).await.map_err(CheckError::probe)?;
        let mut buffer = vec![0u8; 4096];
        let read = socket
            .recv(&mut buffer)
            .await
            .map_err(|e| CheckError::Probe(format!("No RADIUS reply: {e}")))?;
        buffer.truncate(read);
        Ok(buffer)
    })
    .await?;

    let code = verify_response(&response, identifier, &authenticator, config.radius_secret.as_bytes())?;
    match code {
        RADIUS_ACCESS_ACCEPT => Ok(ProbeOutcome::up("Access-Accept")),
        RADIUS_ACCESS_REJECT => Ok(ProbeOutcome::up("Access-Reject (server is responding)")),
        RADIUS_ACCESS_CHALLENGE => Ok(ProbeOutcome::up("Access-Challenge (server is responding)")),
        other => Err(CheckError::Probe(format!("Unexpected RADIUS reply code {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let open = HostPortConfig {
            hostname: "127.0.0.1".to_string(),
            port: Some(port),
        };
        let outcome = check_tcp(&open, Duration::from_secs(2)).await.unwrap();
        assert!(outcome.up);
        assert!(outcome.ping_ms.is_some());

        drop(listener);
        let err = check_tcp(&open, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, CheckError::Probe(_) | CheckError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_tcp_requires_port() {
        let config = HostPortConfig {
            hostname: "localhost".to_string(),
            port: None,
        };
        assert_eq!(
            check_tcp(&config, Duration::from_secs(1)).await.unwrap_err(),
            CheckError::Config("Port is required".to_string())
        );
    }

    #[test]
    fn test_dns_verdict() {
        let records = vec!["93.184.216.34".to_string()];
        assert!(dns_verdict("A", &records, None).unwrap().up);
        assert!(dns_verdict("A", &records, Some("93.184")).unwrap().up);
        let miss = dns_verdict("A", &records, Some("10.0.0.1")).unwrap();
        assert!(!miss.up);
        assert!(!dns_verdict("MX", &[], None).unwrap().up);
    }

    #[tokio::test]
    async fn test_dns_rejects_unknown_record_type() {
        let config = DnsConfig {
            hostname: "example.com".to_string(),
            dns_resolve_type: Some("BOGUS".to_string()),
            dns_server: Some("127.0.0.1".to_string()),
            ..DnsConfig::default()
        };
        assert!(matches!(
            check_dns(&config, Duration::from_secs(1)).await,
            Err(CheckError::Config(_))
        ));
    }

    #[test]
    fn test_parse_tailscale_latency() {
        let output = "pong from node-1 (100.64.0.7) via DERP(fra) in 45ms\n";
        assert_eq!(parse_tailscale_latency(output), Some(45));
        assert_eq!(parse_tailscale_latency("pong from x (1.2.3.4) via 1.2.3.4:41641 in 2.6ms"), Some(3));
        assert_eq!(parse_tailscale_latency("timeout waiting for pong"), None);
    }

    #[test]
    fn test_hide_password_roundtrip() {
        let authenticator = [7u8; 16];
        let hidden = hide_password(b"hunter2", b"secret", &authenticator);
        assert_eq!(hidden.len(), 16);

        // XOR with the same keystream restores the padded plaintext
        let mut context = md5::Context::new();
        context.consume(b"secret");
        context.consume(authenticator);
        let digest = context.compute();
        let plain: Vec<u8> = hidden.iter().zip(digest.iter()).map(|(h, d)| h ^ d).collect();
        assert_eq!(&plain[..7], b"hunter2");
        assert!(plain[7..].iter().all(|b| *b == 0));
    }

    fn signed_reply(code: u8, identifier: u8, request_auth: &[u8; 16], secret: &[u8]) -> Vec<u8> {
        let mut reply = vec![code, identifier, 0, 20];
        let mut context = md5::Context::new();
        context.consume(&reply[0..4]);
        context.consume(request_auth);
        context.consume(secret);
        reply.extend_from_slice(&context.compute().0);
        reply
    }

    #[test]
    fn test_verify_response() {
        let auth = [3u8; 16];
        let reply = signed_reply(RADIUS_ACCESS_REJECT, 9, &auth, b"s3cret");
        assert_eq!(verify_response(&reply, 9, &auth, b"s3cret").unwrap(), RADIUS_ACCESS_REJECT);
        assert!(verify_response(&reply, 9, &auth, b"wrong").is_err());
        assert!(verify_response(&reply, 8, &auth, b"s3cret").is_err());
        assert!(verify_response(&reply[..10], 9, &auth, b"s3cret").is_err());
    }

    #[tokio::test]
    async fn test_radius_against_local_responder() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];
            let (read, peer) = server.recv_from(&mut buffer).await.unwrap();
            let request = &buffer[..read];
            assert_eq!(request[0], RADIUS_ACCESS_REQUEST);
            let mut auth = [0u8; 16];
            auth.copy_from_slice(&request[4..20]);
            let reply = signed_reply(RADIUS_ACCESS_ACCEPT, request[1], &auth, b"testing123");
            server.send_to(&reply, peer).await.unwrap();
        });

        let config = RadiusConfig {
            hostname: "127.0.0.1".to_string(),
            port: Some(port),
            radius_secret: "testing123".to_string(),
            radius_username: Some("probe".to_string()),
            radius_password: Some("probe".to_string()),
            ..RadiusConfig::default()
        };
        let outcome = check_radius(&config, Duration::from_secs(2)).await.unwrap();
        assert!(outcome.up);
        assert_eq!(outcome.message, "Access-Accept");
    }
}
