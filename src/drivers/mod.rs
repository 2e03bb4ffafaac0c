//! Driver-level shims (§4.6): the thin layer a database driver's connection
//! factory calls into. Each shim extracts the same three option keys
//! (`cloudSqlInstance`, `ipTypes`, `unixSocketPath`) and either opens a plain
//! Unix-domain socket or hands off to [`Dialer`].
//!
//! Follows the one-file-per-provider layout this codebase uses elsewhere
//! (`src/connectors/{github,gmail,jira}.rs`, each implementing a shared
//! `Connector` trait over common HTTP plumbing). Here the shared plumbing
//! is [`Dialer`] rather than an HTTP client, so the shims are small enough
//! that a single `DriverOptions`
//! parser plus a `connect` free function per module covers each one.

pub mod mssql;
pub mod mysql;
pub mod postgres;

use std::str::FromStr;

use thiserror::Error;
use tokio::net::UnixStream;
use tokio_rustls::client::TlsStream;

use crate::dialer::{Dialer, DEFAULT_IP_PREFERENCES};
use crate::error::ConnectorError;
use crate::instance_name::InstanceName;
use crate::metadata::IpAddrType;

/// Either a TCP+TLS stream through the core, or a plain Unix-domain socket
/// when the caller configured `unixSocketPath` (§4.6, bypasses the core
/// entirely).
pub enum DriverStream {
    Tls(TlsStream<tokio::net::TcpStream>),
    Unix(UnixStream),
}

/// Errors parsing a driver's option surface, distinct from [`ConnectorError`]
/// because they are detected before any instance is even looked up.
#[derive(Debug, Error)]
pub enum DriverOptionsError {
    #[error("missing required driver option 'cloudSqlInstance'")]
    MissingInstanceName,
    #[error("invalid 'cloudSqlInstance' value: {0}")]
    InvalidInstanceName(#[from] crate::instance_name::InstanceNameError),
    #[error("unrecognized IP type '{0}' in 'ipTypes'; expected PUBLIC, PRIVATE, or PSC")]
    UnknownIpType(String),
}

/// Parsed form of the driver option keys recognized across shims (§6).
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub instance: InstanceName,
    pub ip_prefs: Vec<IpAddrType>,
    pub unix_socket_path: Option<String>,
}

impl DriverOptions {
    /// Parses `cloudSqlInstance` (required), `ipTypes` (optional,
    /// comma-separated, default `PUBLIC,PRIVATE`), and `unixSocketPath`
    /// (optional) from a driver's string-keyed option map.
    pub fn from_options<'a, I>(options: I) -> Result<Self, DriverOptionsError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut cloud_sql_instance = None;
        let mut ip_types = None;
        let mut unix_socket_path = None;

        for (key, value) in options {
            match key {
                "cloudSqlInstance" => cloud_sql_instance = Some(value.to_string()),
                "ipTypes" => ip_types = Some(value.to_string()),
                "unixSocketPath" => unix_socket_path = Some(value.to_string()),
                _ => {}
            }
        }

        let instance: InstanceName = cloud_sql_instance
            .ok_or(DriverOptionsError::MissingInstanceName)?
            .parse()?;

        let ip_prefs = match ip_types {
            Some(raw) => parse_ip_types(&raw)?,
            None => DEFAULT_IP_PREFERENCES.to_vec(),
        };

        Ok(DriverOptions {
            instance,
            ip_prefs,
            unix_socket_path,
        })
    }
}

fn parse_ip_types(raw: &str) -> Result<Vec<IpAddrType>, DriverOptionsError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|tag| {
            IpAddrType::from_str(tag).map_err(|_| DriverOptionsError::UnknownIpType(tag.to_string()))
        })
        .collect()
}

/// Shared connect path used by every driver shim: opens a Unix socket if
/// configured, otherwise dials through the core (§4.6).
pub async fn connect(
    dialer: &Dialer<'_>,
    options: &DriverOptions,
) -> Result<DriverStream, ConnectorError> {
    if let Some(path) = &options.unix_socket_path {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| ConnectorError::Dial {
                instance: options.instance.as_str().to_string(),
                message: format!("failed to open unix socket at '{path}': {e}"),
            })?;
        return Ok(DriverStream::Unix(stream));
    }

    let stream = dialer.dial(&options.instance, &options.ip_prefs).await?;
    Ok(DriverStream::Tls(stream))
}
