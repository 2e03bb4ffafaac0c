//! `Dialer`: the operation driver shims call to get a connected,
//! TLS-handshaken stream to a managed instance (§4.4).
//!
//! Grounded on the connect-then-wrap-in-TLS flow in
//! `probe_certificate_expiry`/`build_tls_connector`
//! (`examples/other_examples/863aeffd_nbari-dbpulse__src-tls-probe.rs.rs`):
//! `TcpStream::connect` followed by `TlsConnector::connect`. That file tears
//! the connection down after reading one certificate; here the handshaken
//! stream is the return value, handed to the caller to speak its own wire
//! protocol over.

use std::net::IpAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use crate::error::ConnectorError;
use crate::instance_name::InstanceName;
use crate::metadata::IpAddrType;
use crate::registry::InstanceRegistry;

/// The fixed port the managed-instance TLS proxy listens on.
pub const PROXY_PORT: u16 = 3307;

/// Default IP type preference order when a caller doesn't specify one
/// (§4.4 Constraints).
pub const DEFAULT_IP_PREFERENCES: &[IpAddrType] = &[IpAddrType::Public, IpAddrType::Private];

/// Dials a managed instance: resolves its `InstanceRefresher` via the
/// registry, picks the first preferred IP address present in its metadata,
/// opens a TCP connection on [`PROXY_PORT`], and performs a TLS handshake
/// using the instance's current TLS client config.
pub struct Dialer<'a> {
    registry: &'a InstanceRegistry,
}

impl<'a> Dialer<'a> {
    pub fn new(registry: &'a InstanceRegistry) -> Self {
        Dialer { registry }
    }

    /// Connects to `name`, preferring IP addresses in `ip_prefs` order.
    /// Blocks on the instance's current refresh if one hasn't completed
    /// yet. On a TLS handshake failure, best-effort triggers a
    /// `forceRefresh()` before surfacing the error — recovery and retry
    /// are the caller's responsibility (§4.4 step 6).
    pub async fn dial(
        &self,
        name: &InstanceName,
        ip_prefs: &[IpAddrType],
    ) -> Result<TlsStream<TcpStream>, ConnectorError> {
        let refresher = self.registry.get_or_create(name);
        let data = refresher.current_data().await?;

        let prefs: &[IpAddrType] = if ip_prefs.is_empty() {
            &[]
        } else {
            ip_prefs
        };
        let ip = data.metadata().preferred_ip(prefs).ok_or_else(|| {
            ConnectorError::Configuration {
                instance: name.as_str().to_string(),
                message: format!(
                    "no IP address matching the requested preferences {prefs:?} for instance \
                     '{name}'"
                ),
            }
        })?;

        let dial_timeout = Duration::from_millis(self.registry.config().dial_timeout_ms);
        let started = std::time::Instant::now();

        let tcp = tokio::time::timeout(dial_timeout, TcpStream::connect((ip, PROXY_PORT)))
            .await
            .map_err(|_| ConnectorError::Dial {
                instance: name.as_str().to_string(),
                message: format!("TCP connect to {ip}:{PROXY_PORT} timed out after {dial_timeout:?}"),
            })?
            .map_err(|e| ConnectorError::Dial {
                instance: name.as_str().to_string(),
                message: format!("TCP connect to {ip}:{PROXY_PORT} failed: {e}"),
            })?;

        let connector = TlsConnector::from(data.tls_config());
        let server_name = server_name_for(ip);

        let tls_result = tokio::time::timeout(dial_timeout, connector.connect(server_name, tcp)).await;

        match tls_result {
            Ok(Ok(stream)) => {
                metrics::histogram!("instance_dial_latency_ms", "instance" => name.as_str().to_string())
                    .record(started.elapsed().as_millis() as f64);
                info!(instance = %name, ip, "dial succeeded");
                Ok(stream)
            }
            Ok(Err(e)) => {
                warn!(instance = %name, error = %e, "TLS handshake failed, triggering best-effort forceRefresh");
                let _ = refresher.force_refresh(self.registry.config()).await;
                Err(ConnectorError::Dial {
                    instance: name.as_str().to_string(),
                    message: format!("TLS handshake with {ip}:{PROXY_PORT} failed: {e}"),
                })
            }
            Err(_) => {
                warn!(instance = %name, "TLS handshake timed out, triggering best-effort forceRefresh");
                let _ = refresher.force_refresh(self.registry.config()).await;
                Err(ConnectorError::Dial {
                    instance: name.as_str().to_string(),
                    message: format!("TLS handshake with {ip}:{PROXY_PORT} timed out after {dial_timeout:?}"),
                })
            }
        }
    }

    /// Exposed for driver-level recovery on handshake failure (§6): requests
    /// an out-of-band refresh for `name`, rate-limited the same as any other
    /// `forceRefresh()` call.
    pub async fn force_refresh(&self, name: &InstanceName) -> Result<(), ConnectorError> {
        let refresher = self.registry.get_or_create(name);
        refresher.force_refresh(self.registry.config()).await
    }
}

/// `rustls` requires a `ServerName` even when the verifier ignores it; the
/// instance is addressed by IP, so the server name carries no identity
/// meaning here (§4.2: "SNI/hostname verification disabled in a way
/// consistent with the instance's certificate identity").
fn server_name_for(ip: &str) -> tokio_rustls::rustls::pki_types::ServerName<'static> {
    use tokio_rustls::rustls::pki_types::ServerName;
    ip.parse::<IpAddr>()
        .map(|addr| ServerName::from(addr).to_owned())
        .unwrap_or_else(|_| {
            ServerName::try_from(ip.to_string()).expect("IP-derived server name is always valid")
        })
}
