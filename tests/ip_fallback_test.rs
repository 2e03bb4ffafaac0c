//! S2 — IP-type fallback: the instance only exposes a PRIVATE
//! address; dialing with preferences `[PUBLIC, PRIVATE]` still connects, by
//! falling through to PRIVATE.

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use dbconnector::admin_api::testing::MockAdminApiClient;
use dbconnector::admin_api::{AdminApiClient, InstanceMetadataResponse};
use dbconnector::config::ConnectorConfig;
use dbconnector::dialer::{Dialer, DEFAULT_IP_PREFERENCES};
use dbconnector::registry::InstanceRegistry;

#[tokio::test]
async fn falls_back_to_private_when_public_is_unavailable() {
    let ip = support::loopback_alias(12);
    let ca = support::TestCa::generate();
    let server = support::spawn_test_server(ip, &ca).await;

    let instance = "p:r:i".parse().unwrap();
    let admin: Arc<dyn AdminApiClient> = Arc::new(MockAdminApiClient::new().with_instance(
        &instance,
        InstanceMetadataResponse {
            ip_addresses: HashMap::from([("PRIVATE".to_string(), ip.to_string())]),
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

    // DEFAULT_IP_PREFERENCES is [Public, Private]; only Private exists.
    let stream = dialer
        .dial(&instance, DEFAULT_IP_PREFERENCES)
        .await
        .expect("dial should fall back to the private address");
    drop(stream);

    server.await.expect("test server task panicked");
    registry.close_all().await;
}
