//! Certificate metadata for HTTPS targets.
//!
//! The handshake always completes so that expired or self-signed certificates can
//! still be described; whether the chain verified against the native roots is
//! recorded in [`TlsInfo::valid`].
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use super::{host_port, with_timeout, CheckError};
use crate::service_monitor::models::TlsInfo;

#[derive(Debug)]
struct RecordingVerifier {
    webpki: Option<Arc<WebPkiServerVerifier>>,
    algorithms: WebPkiSupportedAlgorithms,
    chain_valid: Arc<AtomicBool>,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let valid = self.webpki.as_ref().is_some_and(|verifier| {
            verifier
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .is_ok()
        });
        self.chain_valid.store(valid, Ordering::SeqCst);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    if !loaded.errors.is_empty() {
        debug!(errors = loaded.errors.len(), "Some native certificates could not be loaded.");
    }
    roots.add_parsable_certificates(loaded.certs);
    roots
}

/// Connects to `host:port`, completes a TLS handshake and describes the leaf certificate.
pub async fn fetch_tls_info(host: &str, port: u16, timeout: Duration) -> Result<TlsInfo, CheckError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let roots = native_roots();
    let webpki = if roots.is_empty() {
        None
    } else {
        WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .ok()
    };
    let chain_valid = Arc::new(AtomicBool::new(false));
    let verifier = RecordingVerifier {
        webpki,
        algorithms: provider.signature_verification_algorithms,
        chain_valid: chain_valid.clone(),
    };

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(CheckError::probe)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| CheckError::config(format!("Invalid TLS server name '{host}': {e}")))?;

    let stream = with_timeout(timeout, async {
        let tcp = TcpStream::connect(host_port(host, port))
            .await
            .map_err(CheckError::probe)?;
        TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
            .map_err(|e| CheckError::Probe(format!("TLS handshake failed: {e}")))
    })
    .await?;

    let (_, connection) = stream.get_ref();
    let leaf = connection
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| CheckError::Probe("Server presented no certificate".to_string()))?;

    describe_certificate(leaf.as_ref(), chain_valid.load(Ordering::SeqCst), Utc::now())
}

/// Builds [`TlsInfo`] from a DER encoded certificate.
pub fn describe_certificate(
    der: &[u8],
    chain_valid: bool,
    now: DateTime<Utc>,
) -> Result<TlsInfo, CheckError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CheckError::Probe(format!("Unparseable certificate: {e}")))?;

    let validity = cert.validity();
    let valid_from = DateTime::from_timestamp(validity.not_before.timestamp(), 0);
    let valid_to = DateTime::from_timestamp(validity.not_after.timestamp(), 0);
    let days_remaining = valid_to.map(|to| (to - now).num_days()).unwrap_or(0);
    let in_window = match (valid_from, valid_to) {
        (Some(from), Some(to)) => from <= now && now <= to,
        _ => false,
    };

    let mut subject_alt_names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => subject_alt_names.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => subject_alt_names.push(format_ip(bytes)),
                _ => {}
            }
        }
    }

    Ok(TlsInfo {
        valid: chain_valid && in_window,
        issuer: cert.issuer().to_string(),
        subject: cert.subject().to_string(),
        valid_from,
        valid_to,
        days_remaining,
        fingerprint: fingerprint(der),
        serial_number: cert.raw_serial_as_string(),
        subject_alt_names,
    })
}

/// SHA-256 fingerprint as colon separated upper-case hex.
pub fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn format_ip(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => hex::encode(bytes),
    }
}
