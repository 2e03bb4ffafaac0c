//! Parsed instance metadata, ephemeral certificates, and the bundle an
//! `InstanceRefresher` resolves a refresh slot to.

use std::collections::HashMap;
use std::time::SystemTime;

use rustls_pki_types::CertificateDer;
use x509_parser::prelude::*;

use crate::admin_api::{EphemeralCertificateResponse, InstanceMetadataResponse};
use crate::error::ConnectorError;
use crate::instance_name::InstanceName;

/// Backend generations the control plane may report that this crate knows
/// how to connect to. Anything else is a fatal, permanent configuration
/// error (§3 `InstanceMetadata.backendType` invariant).
const SUPPORTED_BACKEND_TYPES: &[&str] = &["SECOND_GEN"];

/// Preference order for which network address family to dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpAddrType {
    Public,
    Private,
    Psc,
}

impl IpAddrType {
    fn control_plane_key(self) -> &'static str {
        match self {
            IpAddrType::Public => "PRIMARY",
            IpAddrType::Private => "PRIVATE",
            IpAddrType::Psc => "PSC",
        }
    }
}

/// Parses the user-facing IP-type tags recognized in a driver's `ipTypes`
/// option (§6): `PUBLIC`, `PRIVATE`, `PSC`, matched case-sensitively.
impl std::str::FromStr for IpAddrType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLIC" => Ok(IpAddrType::Public),
            "PRIVATE" => Ok(IpAddrType::Private),
            "PSC" => Ok(IpAddrType::Psc),
            _ => Err(()),
        }
    }
}

/// Network and trust-anchor metadata for one instance, parsed from the
/// control plane's response.
///
/// X.509 parsing is grounded on the `x509-parser`-based extraction in
/// `examples/other_examples/863aeffd_nbari-dbpulse__src-tls-probe.rs.rs`
/// (`extract_cert_metadata`) and the `parse_cert`/`expiry` helpers in
/// `examples/other_examples/ee62903e_agentgateway-agentgateway__crates-agentgateway-src-control-caclient.rs.rs`.
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    ip_addresses: HashMap<String, String>,
    server_ca_cert_der: CertificateDer<'static>,
    server_ca_not_after: SystemTime,
    region: String,
    backend_type: String,
}

impl InstanceMetadata {
    /// Parses and validates a control-plane metadata response against the
    /// requested `name`.
    ///
    /// Three invariants are enforced here, each a fatal,
    /// permanent `Configuration` error until the operator or control plane
    /// corrects it: `region` must match the requested region, `backendType`
    /// must name a supported generation, and `ipAddresses` must be
    /// non-empty.
    pub fn from_response(
        name: &InstanceName,
        resp: InstanceMetadataResponse,
    ) -> Result<Self, ConnectorError> {
        let instance_str = name.as_str();

        if resp.region != name.region_id() {
            return Err(ConnectorError::Configuration {
                instance: instance_str.to_string(),
                message: format!(
                    "instance '{instance_str}' was requested in region '{}' but the control \
                     plane reports region '{}'",
                    name.region_id(),
                    resp.region
                ),
            });
        }

        if !SUPPORTED_BACKEND_TYPES.contains(&resp.backend_type.as_str()) {
            return Err(ConnectorError::Configuration {
                instance: instance_str.to_string(),
                message: format!(
                    "instance '{instance_str}' has unsupported backend type '{}' (supported: {})",
                    resp.backend_type,
                    SUPPORTED_BACKEND_TYPES.join(", ")
                ),
            });
        }

        if resp.ip_addresses.is_empty() {
            return Err(ConnectorError::Configuration {
                instance: instance_str.to_string(),
                message: format!(
                    "control plane returned no IP addresses for instance '{instance_str}'"
                ),
            });
        }

        let der = pem_to_der(&resp.server_ca_cert_pem).map_err(|e| ConnectorError::Crypto {
            instance: instance_str.to_string(),
            message: format!("failed to decode server CA certificate PEM: {e}"),
        })?;

        let (_, cert) = X509Certificate::from_der(&der).map_err(|e| ConnectorError::Crypto {
            instance: instance_str.to_string(),
            message: format!("failed to parse server CA certificate: {e}"),
        })?;
        let not_after = cert
            .validity()
            .not_after
            .to_datetime()
            .unix_timestamp();
        let not_after = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(not_after.max(0) as u64);

        Ok(InstanceMetadata {
            ip_addresses: resp.ip_addresses,
            server_ca_cert_der: CertificateDer::from(der),
            server_ca_not_after: not_after,
            region: resp.region,
            backend_type: resp.backend_type,
        })
    }

    pub fn server_ca_cert_der(&self) -> &CertificateDer<'static> {
        &self.server_ca_cert_der
    }

    pub fn server_ca_not_after(&self) -> SystemTime {
        self.server_ca_not_after
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    /// The first address matching `preferences`, in order, or `None` if the
    /// instance exposes none of the preferred types.
    pub fn preferred_ip(&self, preferences: &[IpAddrType]) -> Option<&str> {
        preferences
            .iter()
            .find_map(|pref| self.ip_addresses.get(pref.control_plane_key()))
            .map(String::as_str)
    }
}

/// A short-lived client certificate signed around this process's public
/// key.
#[derive(Debug, Clone)]
pub struct EphemeralCertificate {
    cert_der: CertificateDer<'static>,
    expires_at: SystemTime,
}

impl EphemeralCertificate {
    pub fn from_response(
        instance_str: &str,
        resp: EphemeralCertificateResponse,
    ) -> Result<Self, ConnectorError> {
        let der = pem_to_der(&resp.cert_pem).map_err(|e| ConnectorError::Crypto {
            instance: instance_str.to_string(),
            message: format!("failed to decode ephemeral certificate PEM: {e}"),
        })?;
        let expires_at = SystemTime::UNIX_EPOCH
            + std::time::Duration::from_secs(resp.expiration_unix_secs.max(0) as u64);
        Ok(EphemeralCertificate {
            cert_der: CertificateDer::from(der),
            expires_at,
        })
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }
}

/// The fully resolved bundle a successful refresh produces: the instance's
/// metadata, its current ephemeral certificate, and a ready-to-use TLS
/// client config built from both.
#[derive(Clone)]
pub struct InstanceData {
    metadata: InstanceMetadata,
    certificate: EphemeralCertificate,
    tls_config: std::sync::Arc<rustls::ClientConfig>,
}

impl InstanceData {
    pub fn new(
        metadata: InstanceMetadata,
        certificate: EphemeralCertificate,
        tls_config: std::sync::Arc<rustls::ClientConfig>,
    ) -> Self {
        InstanceData {
            metadata,
            certificate,
            tls_config,
        }
    }

    pub fn metadata(&self) -> &InstanceMetadata {
        &self.metadata
    }

    pub fn certificate(&self) -> &EphemeralCertificate {
        &self.certificate
    }

    pub fn tls_config(&self) -> std::sync::Arc<rustls::ClientConfig> {
        self.tls_config.clone()
    }
}

fn pem_to_der(pem: &str) -> Result<Vec<u8>, String> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .next()
        .transpose()
        .map_err(|e| e.to_string())?
        .map(|der| der.to_vec())
        .ok_or_else(|| "no certificate found in PEM input".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ca_pem() -> String {
        let params = rcgen::CertificateParams::new(vec!["test-ca".to_string()]).unwrap();
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        cert.pem()
    }

    #[test]
    fn preferred_ip_returns_first_matching_type() {
        let meta = InstanceMetadata {
            ip_addresses: HashMap::from([
                ("PRIMARY".to_string(), "1.2.3.4".to_string()),
                ("PRIVATE".to_string(), "10.0.0.1".to_string()),
            ]),
            server_ca_cert_der: CertificateDer::from(vec![]),
            server_ca_not_after: SystemTime::UNIX_EPOCH,
            region: "us-east1".to_string(),
            backend_type: "SECOND_GEN".to_string(),
        };

        assert_eq!(
            meta.preferred_ip(&[IpAddrType::Public, IpAddrType::Private]),
            Some("1.2.3.4")
        );
        assert_eq!(
            meta.preferred_ip(&[IpAddrType::Psc, IpAddrType::Private]),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn preferred_ip_returns_none_when_no_type_matches() {
        let meta = InstanceMetadata {
            ip_addresses: HashMap::from([("PRIMARY".to_string(), "1.2.3.4".to_string())]),
            server_ca_cert_der: CertificateDer::from(vec![]),
            server_ca_not_after: SystemTime::UNIX_EPOCH,
            region: "us-east1".to_string(),
            backend_type: "SECOND_GEN".to_string(),
        };

        assert_eq!(meta.preferred_ip(&[IpAddrType::Psc]), None);
    }

    #[test]
    fn from_response_parses_ca_certificate_not_after() {
        let name: InstanceName = "proj:us-east1:inst".parse().unwrap();
        let resp = InstanceMetadataResponse {
            ip_addresses: HashMap::from([("PRIMARY".to_string(), "1.2.3.4".to_string())]),
            server_ca_cert_pem: sample_ca_pem(),
            region: "us-east1".to_string(),
            backend_type: "SECOND_GEN".to_string(),
        };

        let meta = InstanceMetadata::from_response(&name, resp).unwrap();
        assert!(meta.server_ca_not_after() > SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn from_response_rejects_garbage_pem() {
        let name: InstanceName = "proj:us-east1:inst".parse().unwrap();
        let resp = InstanceMetadataResponse {
            ip_addresses: HashMap::from([("PRIMARY".to_string(), "1.2.3.4".to_string())]),
            server_ca_cert_pem: "not a pem".to_string(),
            region: "us-east1".to_string(),
            backend_type: "SECOND_GEN".to_string(),
        };

        let err = InstanceMetadata::from_response(&name, resp).unwrap_err();
        assert!(matches!(err, ConnectorError::Crypto { .. }));
    }

    #[test]
    fn from_response_rejects_region_mismatch() {
        let name: InstanceName = "proj:us-east1:inst".parse().unwrap();
        let resp = InstanceMetadataResponse {
            ip_addresses: HashMap::from([("PRIMARY".to_string(), "1.2.3.4".to_string())]),
            server_ca_cert_pem: sample_ca_pem(),
            region: "us-west1".to_string(),
            backend_type: "SECOND_GEN".to_string(),
        };

        let err = InstanceMetadata::from_response(&name, resp).unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration { .. }));
    }

    #[test]
    fn from_response_rejects_unsupported_backend_type() {
        let name: InstanceName = "proj:us-east1:inst".parse().unwrap();
        let resp = InstanceMetadataResponse {
            ip_addresses: HashMap::from([("PRIMARY".to_string(), "1.2.3.4".to_string())]),
            server_ca_cert_pem: sample_ca_pem(),
            region: "us-east1".to_string(),
            backend_type: "FIRST_GEN".to_string(),
        };

        let err = InstanceMetadata::from_response(&name, resp).unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration { .. }));
    }

    #[test]
    fn from_response_rejects_empty_ip_addresses() {
        let name: InstanceName = "proj:us-east1:inst".parse().unwrap();
        let resp = InstanceMetadataResponse {
            ip_addresses: HashMap::new(),
            server_ca_cert_pem: sample_ca_pem(),
            region: "us-east1".to_string(),
            backend_type: "SECOND_GEN".to_string(),
        };

        let err = InstanceMetadata::from_response(&name, resp).unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration { .. }));
    }
}
