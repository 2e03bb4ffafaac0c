//! PostgreSQL driver shim (§4.6).

use crate::dialer::Dialer;
use crate::error::ConnectorError;

use super::{connect, DriverOptions, DriverOptionsError, DriverStream};

/// Resolves a PostgreSQL-style connection's option map into a connected
/// stream. See [`crate::drivers::mysql::connect_mysql`] for the shared
/// option keys.
pub async fn connect_postgres<'a, I>(
    dialer: &Dialer<'_>,
    options: I,
) -> Result<DriverStream, PostgresShimError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let opts = DriverOptions::from_options(options)?;
    connect(dialer, &opts)
        .await
        .map_err(PostgresShimError::Connect)
}

#[derive(Debug, thiserror::Error)]
pub enum PostgresShimError {
    #[error(transparent)]
    Options(#[from] DriverOptionsError),
    #[error(transparent)]
    Connect(ConnectorError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin_api::testing::MockAdminApiClient;
    use crate::admin_api::AdminApiClient;
    use crate::config::ConnectorConfig;
    use crate::registry::InstanceRegistry;
    use std::sync::Arc;

    fn test_config() -> Arc<ConnectorConfig> {
        Arc::new(ConnectorConfig::default())
    }

    #[tokio::test]
    async fn rejects_unknown_ip_type_tag() {
        let admin: Arc<dyn AdminApiClient> = Arc::new(MockAdminApiClient::new());
        let registry = InstanceRegistry::new(admin, test_config());
        let dialer = Dialer::new(&registry);

        let err = connect_postgres(
            &dialer,
            [("cloudSqlInstance", "p:r:i"), ("ipTypes", "PUBLIC,BOGUS")],
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PostgresShimError::Options(DriverOptionsError::UnknownIpType(tag)) if tag == "BOGUS"
        ));
        registry.close_all().await;
    }
}
