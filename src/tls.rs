//! Builds the per-instance `rustls::ClientConfig`: client identity is the
//! ephemeral certificate and process keypair, trust anchor is exactly the
//! instance's own server CA certificate — no system roots, no hostname
//! check, since the dialer connects by IP address and the CA relationship
//! is itself the identity proof.
//!
//! Grounded on `build_tls_connector`/`NoVerifier` in
//! `examples/other_examples/863aeffd_nbari-dbpulse__src-tls-probe.rs.rs`
//! (custom verifier installed via `.dangerous().with_custom_certificate_verifier`,
//! `.with_client_auth_cert` for the client identity) and on the per-identity
//! `legacy_mtls` builder in
//! `examples/other_examples/ee62903e_agentgateway-agentgateway__crates-agentgateway-src-control-caclient.rs.rs`.
//! Unlike the probe's `NoVerifier`, which accepts any certificate, the
//! verifier built here performs real chain and validity checks against the
//! single trusted CA; only the hostname/SAN match is intentionally skipped.

use std::sync::{Arc, OnceLock};

use rsa::pkcs8::EncodePrivateKey;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use x509_parser::prelude::*;

use crate::error::ConnectorError;
use crate::keys::KeyPair;
use crate::metadata::{EphemeralCertificate, InstanceMetadata};

static CRYPTO_PROVIDER_INIT: OnceLock<()> = OnceLock::new();

/// Installs the process-wide `ring` crypto provider. Idempotent; safe to
/// call from every `TlsContextBuilder::build` invocation.
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.get_or_init(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            // Another caller in this process already installed a provider
            // (possibly a different one); either way TLS can proceed.
        }
    });
}

/// A `ServerCertVerifier` trusting exactly one CA certificate and skipping
/// hostname verification.
#[derive(Debug)]
struct SingleCaVerifier {
    ca_der: CertificateDer<'static>,
}

impl ServerCertVerifier for SingleCaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let (_, ca_cert) = X509Certificate::from_der(&self.ca_der).map_err(|e| {
            rustls::Error::General(format!("failed to parse trusted CA certificate: {e}"))
        })?;
        let (_, leaf) = X509Certificate::from_der(end_entity).map_err(|e| {
            rustls::Error::General(format!("failed to parse server certificate: {e}"))
        })?;

        let asn1_now = ASN1Time::from_timestamp(now.as_secs() as i64).map_err(|e| {
            rustls::Error::General(format!("invalid verification timestamp: {e}"))
        })?;
        if !leaf.validity().is_valid_at(asn1_now) {
            return Err(rustls::Error::General(
                "server certificate is outside its validity period".to_string(),
            ));
        }

        if leaf.issuer() != ca_cert.subject() {
            return Err(rustls::Error::General(
                "server certificate was not issued by the trusted CA".to_string(),
            ));
        }

        leaf.verify_signature(Some(ca_cert.public_key()))
            .map_err(|e| {
                rustls::Error::General(format!(
                    "server certificate signature does not verify against the trusted CA: {e}"
                ))
            })?;

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds a `rustls::ClientConfig` for one instance's current ephemeral
/// certificate, key pair, and server CA.
pub struct TlsContextBuilder;

impl TlsContextBuilder {
    /// Assembles the client TLS config used by `Dialer::dial` for this
    /// instance.
    pub fn build(
        instance_str: &str,
        metadata: &InstanceMetadata,
        certificate: &EphemeralCertificate,
        key_pair: &KeyPair,
    ) -> Result<Arc<ClientConfig>, ConnectorError> {
        ensure_crypto_provider();

        let verifier = Arc::new(SingleCaVerifier {
            ca_der: metadata.server_ca_cert_der().clone(),
        });

        let client_cert_chain = vec![certificate.cert_der().clone()];
        let private_key_der = rsa_private_key_der(instance_str, key_pair)?;

        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_auth_cert(client_cert_chain, private_key_der)
            .map_err(|e| ConnectorError::Crypto {
                instance: instance_str.to_string(),
                message: format!("failed to build TLS client config: {e}"),
            })?;

        Ok(Arc::new(config))
    }
}

fn rsa_private_key_der(
    instance_str: &str,
    key_pair: &KeyPair,
) -> Result<PrivateKeyDer<'static>, ConnectorError> {
    let der = key_pair
        .private_key()
        .to_pkcs8_der()
        .map_err(|e| ConnectorError::Crypto {
            instance: instance_str.to_string(),
            message: format!("failed to encode client private key: {e}"),
        })?;
    Ok(PrivateKeyDer::Pkcs8(der.as_bytes().to_vec().into()))
}
