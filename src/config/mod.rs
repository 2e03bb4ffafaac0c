//! Configuration for the credential refresh engine.
//!
//! Loads layered `.env` files plus `DBCONNECT_`-prefixed environment
//! variables, the same layering shape an `AppConfig`/`ConfigLoader` uses
//! elsewhere in this codebase for HTTP service config: `.env`, `.env.local`,
//! `.env.<profile>`, `.env.<profile>.local`, then process environment wins
//! last.

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables for the refresh engine, the dialer, and ambient logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ConnectorConfig {
    /// Delay before a Fresh engine schedules its follow-on refresh (§4.1).
    /// Default 3300s (55 minutes), slightly shorter than the ~60-minute
    /// ephemeral certificate validity.
    #[serde(default = "default_refresh_lead_seconds")]
    pub refresh_lead_seconds: u64,
    /// Minimum spacing between accepted `forceRefresh()` calls (§5).
    #[serde(default = "default_force_refresh_min_interval_seconds")]
    pub force_refresh_min_interval_seconds: u64,
    /// Bounds TCP connect + TLS handshake in `Dialer::dial` (§4.4).
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Bounds each control-plane RPC during a refresh cycle (§4.1).
    #[serde(default = "default_admin_api_timeout_ms")]
    pub admin_api_timeout_ms: u64,
    /// Bit size of the process-wide RSA keypair (§3); must be >= 2048.
    #[serde(default = "default_rsa_key_bits")]
    pub rsa_key_bits: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `"json"` or `"pretty"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            refresh_lead_seconds: default_refresh_lead_seconds(),
            force_refresh_min_interval_seconds: default_force_refresh_min_interval_seconds(),
            dial_timeout_ms: default_dial_timeout_ms(),
            admin_api_timeout_ms: default_admin_api_timeout_ms(),
            rsa_key_bits: default_rsa_key_bits(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl ConnectorConfig {
    /// A redacted JSON representation. No secrets live in this schema, but
    /// the method is kept so callers have a single place to log config from
    /// without worrying that a future field needs redacting.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn default_refresh_lead_seconds() -> u64 {
    3300
}

fn default_force_refresh_min_interval_seconds() -> u64 {
    60
}

fn default_dial_timeout_ms() -> u64 {
    10_000
}

fn default_admin_api_timeout_ms() -> u64 {
    30_000
}

fn default_rsa_key_bits() -> usize {
    2048
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid {field} value '{value}': {source}")]
    InvalidValue {
        field: &'static str,
        value: String,
        source: std::num::ParseIntError,
    },
    #[error("rsa_key_bits must be >= 2048, got {0}")]
    KeyTooSmall(usize),
}

/// Loads [`ConnectorConfig`] from layered `.env` files and `DBCONNECT_*`
/// environment variables.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<ConnectorConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Process environment wins over every file layer.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("DBCONNECT_") {
                layered.insert(stripped.to_string(), value);
            }
        }
        let _ = profile_hint;

        let refresh_lead_seconds = parse_or_default(
            &mut layered,
            "REFRESH_LEAD_SECONDS",
            default_refresh_lead_seconds(),
        )?;
        let force_refresh_min_interval_seconds = parse_or_default(
            &mut layered,
            "FORCE_REFRESH_MIN_INTERVAL_SECONDS",
            default_force_refresh_min_interval_seconds(),
        )?;
        let dial_timeout_ms =
            parse_or_default(&mut layered, "DIAL_TIMEOUT_MS", default_dial_timeout_ms())?;
        let admin_api_timeout_ms = parse_or_default(
            &mut layered,
            "ADMIN_API_TIMEOUT_MS",
            default_admin_api_timeout_ms(),
        )?;
        let rsa_key_bits: usize =
            parse_or_default(&mut layered, "RSA_KEY_BITS", default_rsa_key_bits())?;
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);

        if rsa_key_bits < 2048 {
            return Err(ConfigError::KeyTooSmall(rsa_key_bits));
        }

        Ok(ConnectorConfig {
            refresh_lead_seconds,
            force_refresh_min_interval_seconds,
            dial_timeout_ms,
            admin_api_timeout_ms,
            rsa_key_bits,
            log_level,
            log_format,
        })
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("DBCONNECT_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(|| "local".to_string());

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("DBCONNECT_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_or_default<T>(
    layered: &mut BTreeMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match layered.remove(key) {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|source| ConfigError::InvalidValue {
                field: key,
                value: raw,
                source,
            }),
        _ => Ok(default),
    }
}
