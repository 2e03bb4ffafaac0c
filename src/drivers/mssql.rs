//! SQL Server driver shim (§4.6).

use crate::dialer::Dialer;
use crate::error::ConnectorError;

use super::{connect, DriverOptions, DriverOptionsError, DriverStream};

/// Resolves a SQL Server-style connection's option map into a connected
/// stream. See [`crate::drivers::mysql::connect_mysql`] for the shared
/// option keys.
pub async fn connect_mssql<'a, I>(
    dialer: &Dialer<'_>,
    options: I,
) -> Result<DriverStream, MssqlShimError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let opts = DriverOptions::from_options(options)?;
    connect(dialer, &opts).await.map_err(MssqlShimError::Connect)
}

#[derive(Debug, thiserror::Error)]
pub enum MssqlShimError {
    #[error(transparent)]
    Options(#[from] DriverOptionsError),
    #[error(transparent)]
    Connect(ConnectorError),
}
