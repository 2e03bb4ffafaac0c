//! S1 — happy path: a fresh instance resolves metadata and an
//! ephemeral certificate, and the first `dial` completes a real TLS
//! handshake against the reported IP on port 3307.

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use dbconnector::admin_api::testing::MockAdminApiClient;
use dbconnector::admin_api::{AdminApiClient, InstanceMetadataResponse};
use dbconnector::config::ConnectorConfig;
use dbconnector::dialer::Dialer;
use dbconnector::metadata::IpAddrType;
use dbconnector::registry::InstanceRegistry;

#[tokio::test]
async fn happy_path_dials_the_reported_public_address() {
    let ip = support::loopback_alias(11);
    let ca = support::TestCa::generate();
    let server = support::spawn_test_server(ip, &ca).await;

    let instance = "p:r:i".parse().unwrap();
    let admin: Arc<dyn AdminApiClient> = Arc::new(MockAdminApiClient::new().with_instance(
        &instance,
        InstanceMetadataResponse {
            ip_addresses: HashMap::from([("PRIMARY".to_string(), ip.to_string())]),
            server_ca_cert_pem: ca.cert_pem().to_string(),
            region: "r".to_string(),
            backend_type: "SECOND_GEN".to_string(),
        },
    ));
    let config = Arc::new(ConnectorConfig {
        dial_timeout_ms: 5_000,
        admin_api_timeout_ms: 5_000,
        ..ConnectorConfig::default()
    });
    let registry = InstanceRegistry::new(admin, config);
    let dialer = Dialer::new(&registry);

    let stream = dialer
        .dial(&instance, &[IpAddrType::Public])
        .await
        .expect("dial should succeed against the test server");
    drop(stream);

    server.await.expect("test server task panicked");
    registry.close_all().await;
}
