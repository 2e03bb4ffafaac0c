//! MySQL driver shim (§4.6).

use crate::dialer::Dialer;
use crate::error::ConnectorError;

use super::{connect, DriverOptions, DriverOptionsError, DriverStream};

/// Resolves a MySQL-style connection's option map into a connected stream.
///
/// `options` carries the same three keys every shim recognizes:
/// `cloudSqlInstance`, `ipTypes`, `unixSocketPath`.
pub async fn connect_mysql<'a, I>(
    dialer: &Dialer<'_>,
    options: I,
) -> Result<DriverStream, MysqlShimError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let opts = DriverOptions::from_options(options)?;
    connect(dialer, &opts).await.map_err(MysqlShimError::Connect)
}

#[derive(Debug, thiserror::Error)]
pub enum MysqlShimError {
    #[error(transparent)]
    Options(#[from] DriverOptionsError),
    #[error(transparent)]
    Connect(ConnectorError),
}
