//! Shared TLS client configuration for talking to the robots.
//!
//! The robots terminate TLS with a self-signed certificate issued by an
//! internal vendor CA and an ancient cipher policy, so the stock WebPKI
//! verification path can never succeed against them. Both the credential
//! exchange and the MQTT session use the configuration built here: peer
//! verification disabled, default provider cipher suites (rustls ships no
//! finite-field DH suites, which is exactly the restriction the firmware
//! needs), TLS 1.2 still permitted for the older models.
//!
//! Building a `ClientConfig` is expensive and the result is immutable, so it
//! is constructed once per process and shared from then on.

use std::sync::{Arc, OnceLock};

use rumqttc::tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, SignatureScheme,
};

static DEVICE_TLS_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

/// The process-wide TLS configuration for robot connections.
///
/// Lazily built on first use, immutable afterwards, safe to share across
/// concurrent credential exchanges and MQTT sessions.
pub fn device_tls_config() -> Arc<ClientConfig> {
    DEVICE_TLS_CONFIG.get_or_init(build_config).clone()
}

fn build_config() -> Arc<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .expect("default provider supports all protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        .with_no_client_auth();
    Arc::new(config)
}

/// Certificate verifier that accepts whatever the robot presents.
///
/// Signature checks still run against the provider's algorithms; only the
/// chain/identity verification is skipped.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_built_once_and_shared() {
        let first = device_tls_config();
        let second = device_tls_config();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
