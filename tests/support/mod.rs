//! Shared harness for the end-to-end dial tests: a minimal rustls TLS server
//! presenting a certificate signed by a throwaway CA, bound to a loopback
//! address on `dbconnector::dialer::PROXY_PORT` (§4.4, §8 S1/S2/S6).
//!
//! Grounded on the connect-then-handshake shape in
//! `examples/other_examples/863aeffd_nbari-dbpulse__src-tls-probe.rs.rs`,
//! mirrored server-side with `rcgen` + `tokio-rustls`'s `TlsAcceptor`.

use std::net::IpAddr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use dbconnector::dialer::PROXY_PORT;

/// A throwaway CA used to sign one server leaf certificate per test.
pub struct TestCa {
    cert_pem: String,
    rcgen_cert: rcgen::Certificate,
    key_pair: rcgen::KeyPair,
}

impl TestCa {
    pub fn generate() -> Self {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let rcgen_cert = params.self_signed(&key_pair).unwrap();
        let cert_pem = rcgen_cert.pem();
        TestCa {
            cert_pem,
            rcgen_cert,
            key_pair,
        }
    }

    /// PEM the control plane would report as `serverCaCert.cert`.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    fn issue_leaf(&self, ip: IpAddr) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::NoCa;
        params.subject_alt_names = vec![rcgen::SanType::IpAddress(ip)];
        let leaf_cert = params
            .signed_by(&leaf_key, &self.rcgen_cert, &self.key_pair)
            .unwrap();
        let der = CertificateDer::from(leaf_cert.der().to_vec());
        let key_der = PrivateKeyDer::Pkcs8(leaf_key.serialize_der().into());
        (der, key_der)
    }
}

/// Installs the process-wide `ring` crypto provider if nothing else in this
/// test binary has already installed one.
fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Binds a one-shot TLS server to `ip:PROXY_PORT`, accepts exactly one
/// connection, completes the handshake, then returns. Each call to
/// `dbconnector::Dialer::dial` against `ip` consumes one accepted
/// connection.
pub async fn spawn_test_server(ip: IpAddr, ca: &TestCa) -> tokio::task::JoinHandle<()> {
    ensure_crypto_provider();

    let (leaf_der, key_der) = ca.issue_leaf(ip);
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![leaf_der], key_der)
        .expect("test server TLS config is valid");
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind((ip, PROXY_PORT))
        .await
        .unwrap_or_else(|e| panic!("failed to bind test server to {ip}:{PROXY_PORT}: {e}"));

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("test server accept failed");
        let _tls = acceptor
            .accept(tcp)
            .await
            .expect("test server TLS handshake failed");
    })
}

/// Distinct loopback addresses so tests in the same binary can each own a
/// fixed `PROXY_PORT` listener without colliding.
pub fn loopback_alias(last_octet: u8) -> IpAddr {
    IpAddr::from([127, 0, 0, last_octet])
}
