//! Process-wide registry guaranteeing at most one `InstanceRefresher` per
//! instance connection name.
//!
//! Generalized from the `Registry` in `src/connectors/registry.rs`
//! elsewhere in this codebase: the same `OnceLock<Arc<RwLock<...>>>`
//! global-singleton shape, `get` returning a typed error for an unknown
//! key, but keyed by instance
//! connection name and lazily constructing its values (an
//! `InstanceRefresher` per instance) rather than being pre-populated by an
//! `initialize` step, since instances aren't known ahead of time the way
//! this codebase's fixed provider list is.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::admin_api::AdminApiClient;
use crate::config::ConnectorConfig;
use crate::instance_name::InstanceName;
use crate::keys::KeyPairSource;
use crate::refresh::InstanceRefresher;

/// Holds the shared collaborators every `InstanceRefresher` needs
/// (control-plane client, config, keypair source) plus the map of
/// already-running refreshers.
pub struct InstanceRegistry {
    admin: Arc<dyn AdminApiClient>,
    config: Arc<ConnectorConfig>,
    keys: Arc<KeyPairSource>,
    refreshers: RwLock<HashMap<String, Arc<InstanceRefresher>>>,
}

impl InstanceRegistry {
    pub fn new(admin: Arc<dyn AdminApiClient>, config: Arc<ConnectorConfig>) -> Self {
        let keys = Arc::new(KeyPairSource::new(config.rsa_key_bits));
        InstanceRegistry {
            admin,
            config,
            keys,
            refreshers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the running refresher for `name`, starting one if this is
    /// the first request for it.
    pub fn get_or_create(&self, name: &InstanceName) -> Arc<InstanceRefresher> {
        if let Some(existing) = self.refreshers.read().unwrap().get(name.as_str()) {
            return existing.clone();
        }

        let mut refreshers = self.refreshers.write().unwrap();
        // Re-check under the write lock: another caller may have created it
        // between our read-lock release and this write-lock acquisition.
        if let Some(existing) = refreshers.get(name.as_str()) {
            return existing.clone();
        }

        let refresher = InstanceRefresher::spawn(
            name.clone(),
            self.admin.clone(),
            self.config.clone(),
            self.keys.clone(),
        );
        refreshers.insert(name.as_str().to_string(), refresher.clone());
        refresher
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Stops every running refresher. Intended for graceful shutdown; the
    /// registry itself remains usable afterward (a subsequent
    /// `get_or_create` starts a fresh refresher).
    pub async fn close_all(&self) {
        let refreshers: Vec<_> = self.refreshers.write().unwrap().drain().map(|(_, v)| v).collect();
        for refresher in refreshers {
            refresher.close().await;
        }
    }
}

/// The process-wide default registry, built once from a supplied
/// `AdminApiClient` and `ConnectorConfig`.
///
/// Mirrors `Registry::global()`'s `OnceLock`-backed singleton; unlike that
/// one, this is seeded from caller-supplied collaborators on first use
/// rather than reading them from a fixed global config, since the admin API
/// client is itself a trait object the caller provides.
static GLOBAL: OnceLock<Arc<InstanceRegistry>> = OnceLock::new();

/// Returns the process-wide registry, constructing it from `admin`/`config`
/// on the first call. Later calls ignore their arguments and return the
/// already-constructed registry — callers that need distinct registries
/// (e.g. per-test isolation) should build an `InstanceRegistry` directly
/// instead of going through this singleton.
pub fn global(admin: Arc<dyn AdminApiClient>, config: Arc<ConnectorConfig>) -> Arc<InstanceRegistry> {
    GLOBAL
        .get_or_init(|| Arc::new(InstanceRegistry::new(admin, config)))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin_api::testing::MockAdminApiClient;

    fn test_config() -> Arc<ConnectorConfig> {
        Arc::new(ConnectorConfig {
            refresh_lead_seconds: 3300,
            force_refresh_min_interval_seconds: 60,
            dial_timeout_ms: 10_000,
            admin_api_timeout_ms: 5_000,
            rsa_key_bits: 2048,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        })
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_refresher_for_the_same_name() {
        let instance: InstanceName = "proj:region:inst".parse().unwrap();
        let admin: Arc<dyn AdminApiClient> = Arc::new(MockAdminApiClient::new());
        let registry = InstanceRegistry::new(admin, test_config());

        let first = registry.get_or_create(&instance);
        let second = registry.get_or_create(&instance);
        assert!(Arc::ptr_eq(&first, &second));

        registry.close_all().await;
    }

    #[tokio::test]
    async fn get_or_create_returns_distinct_refreshers_for_distinct_names() {
        let a: InstanceName = "proj:region:inst-a".parse().unwrap();
        let b: InstanceName = "proj:region:inst-b".parse().unwrap();
        let admin: Arc<dyn AdminApiClient> = Arc::new(MockAdminApiClient::new());
        let registry = InstanceRegistry::new(admin, test_config());

        let first = registry.get_or_create(&a);
        let second = registry.get_or_create(&b);
        assert!(!Arc::ptr_eq(&first, &second));

        registry.close_all().await;
    }
}
