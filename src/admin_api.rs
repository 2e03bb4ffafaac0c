//! The control-plane collaborator this crate talks to: an interface only.
//!
//! Generalizes the `Connector` trait elsewhere in this codebase
//! (`src/connectors/trait_.rs`: async methods returning boxed errors, one
//! impl per third-party provider) to a single external collaborator — the
//! managed database control plane — that callers supply their own
//! implementation of. This crate ships no
//! production implementation beyond the optional `reqwest`-backed one
//! behind the `http-admin-api` feature; the core refresh engine only ever
//! depends on the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::instance_name::InstanceName;

/// Instance-level metadata as returned by the control plane: network
/// addresses, the server's CA certificate, and backend classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMetadataResponse {
    /// IP addresses keyed by type, e.g. `"PRIMARY"`, `"PRIVATE"`, `"OUTGOING"`.
    pub ip_addresses: std::collections::HashMap<String, String>,
    /// PEM-encoded CA certificate the server presents during the TLS
    /// handshake.
    pub server_ca_cert_pem: String,
    pub region: String,
    pub backend_type: String,
}

/// A freshly minted client certificate, valid for a short window, issued
/// around the caller-supplied public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralCertificateResponse {
    pub cert_pem: String,
    pub expiration_unix_secs: i64,
}

/// A structured error surfaced by the control plane, distinct from
/// transport-level failures (timeouts, connection refused), which
/// implementations should signal instead via `Err(Box<dyn Error>)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminApiError {
    pub reason: String,
    pub message: String,
}

impl std::fmt::Display for AdminApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.reason)
    }
}

impl std::error::Error for AdminApiError {}

/// The control-plane API this crate's refresh engine depends on.
///
/// Callers provide their own implementation backed by whatever transport
/// and authentication scheme their control plane requires; this crate never
/// assumes a particular HTTP client or credential scheme beyond what the
/// optional default implementation in [`http`](self) uses.
#[async_trait]
pub trait AdminApiClient: Send + Sync {
    /// Fetches current network and CA metadata for an instance.
    async fn get_instance(
        &self,
        instance: &InstanceName,
    ) -> Result<InstanceMetadataResponse, Box<dyn std::error::Error + Send + Sync>>;

    /// Requests a new ephemeral client certificate for `instance`, signed
    /// around `public_key_pem` (a PKCS#1 `-----BEGIN RSA PUBLIC KEY-----`
    /// block).
    async fn create_ephemeral_certificate(
        &self,
        instance: &InstanceName,
        public_key_pem: &str,
    ) -> Result<EphemeralCertificateResponse, Box<dyn std::error::Error + Send + Sync>>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    /// An in-memory [`AdminApiClient`] double, grounded on the hand-rolled
    /// `TestConnector` elsewhere in this codebase (`src/connectors/registry.rs`'s test
    /// module): fixed fixtures per instance, with an optional forced error
    /// to exercise the refresh engine's error-classification paths.
    pub struct MockAdminApiClient {
        metadata: Map<String, InstanceMetadataResponse>,
        cert_requests: Mutex<u64>,
        force_error: Option<AdminApiError>,
    }

    impl MockAdminApiClient {
        pub fn new() -> Self {
            MockAdminApiClient {
                metadata: Map::new(),
                cert_requests: Mutex::new(0),
                force_error: None,
            }
        }

        pub fn with_instance(mut self, instance: &InstanceName, meta: InstanceMetadataResponse) -> Self {
            self.metadata.insert(instance.as_str().to_string(), meta);
            self
        }

        pub fn with_forced_error(mut self, error: AdminApiError) -> Self {
            self.force_error = Some(error);
            self
        }

        pub fn cert_request_count(&self) -> u64 {
            *self.cert_requests.lock().unwrap()
        }
    }

    impl Default for MockAdminApiClient {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl AdminApiClient for MockAdminApiClient {
        async fn get_instance(
            &self,
            instance: &InstanceName,
        ) -> Result<InstanceMetadataResponse, Box<dyn std::error::Error + Send + Sync>> {
            if let Some(err) = &self.force_error {
                return Err(Box::new(err.clone()));
            }
            self.metadata
                .get(instance.as_str())
                .cloned()
                .ok_or_else(|| -> Box<dyn std::error::Error + Send + Sync> {
                    Box::new(AdminApiError {
                        reason: "notAuthorized".to_string(),
                        message: format!("no fixture registered for instance '{instance}'"),
                    })
                })
        }

        async fn create_ephemeral_certificate(
            &self,
            instance: &InstanceName,
            _public_key_pem: &str,
        ) -> Result<EphemeralCertificateResponse, Box<dyn std::error::Error + Send + Sync>> {
            if let Some(err) = &self.force_error {
                return Err(Box::new(err.clone()));
            }
            *self.cert_requests.lock().unwrap() += 1;
            if !self.metadata.contains_key(instance.as_str()) {
                return Err(Box::new(AdminApiError {
                    reason: "notAuthorized".to_string(),
                    message: format!("no fixture registered for instance '{instance}'"),
                }));
            }
            Ok(EphemeralCertificateResponse {
                cert_pem: mock_leaf_cert_pem(),
                expiration_unix_secs: mock_now_unix() + 3600,
            })
        }
    }

    /// A fixed, non-expired placeholder leaf certificate PEM for tests that
    /// don't need real cryptographic validity (unit tests of the scheduler
    /// state machine). Tests that need a verifiable chain generate their
    /// own via `rcgen` in `tests/`.
    fn mock_leaf_cert_pem() -> String {
        "-----BEGIN CERTIFICATE-----\nMOCK\n-----END CERTIFICATE-----\n".to_string()
    }

    fn mock_now_unix() -> i64 {
        // Tests that care about absolute time use `tokio::time::pause()`
        // and relative durations instead of reading wall-clock time here.
        1_700_000_000
    }

    #[test]
    fn mock_returns_registered_instance_metadata() {
        let instance: InstanceName = "proj:region:inst".parse().unwrap();
        let client = MockAdminApiClient::new().with_instance(
            &instance,
            InstanceMetadataResponse {
                ip_addresses: Map::from([("PRIMARY".to_string(), "10.0.0.1".to_string())]),
                server_ca_cert_pem: "ca".to_string(),
                region: "region".to_string(),
                backend_type: "SECOND_GEN".to_string(),
            },
        );

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(client.get_instance(&instance)).unwrap();
        assert_eq!(result.region, "region");
    }

    #[test]
    fn mock_rejects_unknown_instance() {
        let instance: InstanceName = "proj:region:inst".parse().unwrap();
        let client = MockAdminApiClient::new();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt.block_on(client.get_instance(&instance)).unwrap_err();
        assert!(err.to_string().contains("no fixture registered"));
    }

    #[test]
    fn mock_surfaces_forced_errors() {
        let instance: InstanceName = "proj:region:inst".parse().unwrap();
        let client = MockAdminApiClient::new().with_forced_error(AdminApiError {
            reason: "accessNotConfigured".to_string(),
            message: "API disabled".to_string(),
        });
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt.block_on(client.get_instance(&instance)).unwrap_err();
        assert!(err.to_string().contains("accessNotConfigured"));
    }
}

#[cfg(feature = "http-admin-api")]
pub mod http {
    //! A default `reqwest`-backed [`AdminApiClient`], provided for
    //! convenience; the refresh engine itself never depends on this module.

    use super::*;

    pub struct HttpAdminApiClient {
        base_url: String,
        http: reqwest::Client,
    }

    impl HttpAdminApiClient {
        pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
            HttpAdminApiClient {
                base_url: base_url.into(),
                http: reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .expect("reqwest client configuration is valid"),
            }
        }
    }

    #[async_trait]
    impl AdminApiClient for HttpAdminApiClient {
        async fn get_instance(
            &self,
            instance: &InstanceName,
        ) -> Result<InstanceMetadataResponse, Box<dyn std::error::Error + Send + Sync>> {
            let url = format!(
                "{}/v1/projects/{}/instances/{}",
                self.base_url,
                instance.project_id(),
                instance.instance_id()
            );
            let resp = self.http.get(url).send().await?.error_for_status()?;
            Ok(resp.json::<InstanceMetadataResponse>().await?)
        }

        async fn create_ephemeral_certificate(
            &self,
            instance: &InstanceName,
            public_key_pem: &str,
        ) -> Result<EphemeralCertificateResponse, Box<dyn std::error::Error + Send + Sync>> {
            let url = format!(
                "{}/v1/projects/{}/instances/{}:generateEphemeralCert",
                self.base_url,
                instance.project_id(),
                instance.instance_id()
            );
            let resp = self
                .http
                .post(url)
                .json(&serde_json::json!({ "public_key": public_key_pem }))
                .send()
                .await?
                .error_for_status()?;
            Ok(resp.json::<EphemeralCertificateResponse>().await?)
        }
    }
}
