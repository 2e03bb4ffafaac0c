//! Unified error handling for the refresh engine and its callers.
//!
//! Generalizes the `ApiError`/`AppError` split used elsewhere in this
//! codebase (a status-carrying `thiserror` enum plus a classifier for
//! upstream error reasons) to a
//! library with no HTTP surface: there is no `IntoResponse` impl here, only
//! the error kinds and the remediation-text mapping this crate actually
//! needs.

use thiserror::Error;

use crate::instance_name::InstanceNameError;

/// The crate-wide error type returned by `currentData()`, `forceRefresh()`,
/// and `Dialer::dial()`.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// Malformed instance name, region mismatch, unsupported backend type,
    /// or no matching preferred IP. Permanent until the caller fixes the
    /// input.
    #[error("configuration error for instance '{instance}': {message}")]
    Configuration { instance: String, message: String },

    /// Control-plane API not enabled, or caller not authorized.
    #[error("{message}")]
    Authorization { message: String },

    /// Network timeouts, 5xx responses, or parse failures from the control
    /// plane. Retried automatically by the refresh scheduler.
    #[error("transient control-plane error for instance '{instance}': {message}")]
    Transient { instance: String, message: String },

    /// Key generation, certificate parsing, or TLS context construction
    /// failures.
    #[error("cryptographic error for instance '{instance}': {message}")]
    Crypto { instance: String, message: String },

    /// TCP connect or TLS handshake failures during `dial()`. Not retried
    /// internally; the caller decides whether to `forceRefresh()` and
    /// retry.
    #[error("dial error for instance '{instance}': {message}")]
    Dial { instance: String, message: String },
}

impl From<InstanceNameError> for ConnectorError {
    fn from(err: InstanceNameError) -> Self {
        let InstanceNameError::WrongFieldCount { ref raw, .. } = err;
        ConnectorError::Configuration {
            instance: raw.clone(),
            message: err.to_string(),
        }
    }
}

/// Maps known control-plane error reasons to actionable messages (§4.5 of
/// the underlying design).
///
/// Mirrors `TokenRefreshService::classify_refresh_error`'s shape (a plain
/// function over a raw error reason string) but produces a fully formed
/// [`ConnectorError`] rather than an internal classification enum, since
/// here the remediation text itself is the point.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// `reason` is the control plane's machine-readable error reason (e.g.
    /// the `reason` field of a structured API error), `project_id` is used
    /// to build remediation text, `instance_str` is attached to the
    /// fallback `Transient` variant so an unrecognized reason still carries
    /// instance context through the refresh-result promise.
    ///
    /// Only the two known enablement/authorization reasons are treated as
    /// permanent, actionable errors (§4.5); every other reason is a generic
    /// control-plane failure (§4.5: "all other errors → generic message
    /// preserving the underlying cause") and is classified `Transient` so
    /// the scheduler retries it instead of surfacing it as something the
    /// operator must go fix.
    pub fn classify(reason: &str, project_id: &str, instance_str: &str, detail: &str) -> ConnectorError {
        match reason {
            "accessNotConfigured" => ConnectorError::Authorization {
                message: format!(
                    "the admin API is not enabled for project '{project_id}'; enable it at \
                     https://console.cloud.google.com/apis/library/sqladmin.googleapis.com?project={project_id} \
                     and retry (underlying error: {detail})"
                ),
            },
            "notAuthorized" => ConnectorError::Authorization {
                message: format!(
                    "not authorized to access an instance in project '{project_id}'; verify the \
                     instance exists and the caller has the required IAM permissions \
                     (underlying error: {detail})"
                ),
            },
            other => ConnectorError::Transient {
                instance: instance_str.to_string(),
                message: format!("control-plane request failed ({other}): {detail}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_access_not_configured() {
        let err = ErrorClassifier::classify("accessNotConfigured", "my-proj", "p:r:i", "403 Forbidden");
        match err {
            ConnectorError::Authorization { message } => {
                assert!(message.contains("my-proj"));
                assert!(message.contains("enable"));
            }
            _ => panic!("expected Authorization variant"),
        }
    }

    #[test]
    fn classifies_not_authorized() {
        let err = ErrorClassifier::classify("notAuthorized", "my-proj", "p:r:i", "403 Forbidden");
        match err {
            ConnectorError::Authorization { message } => {
                assert!(message.contains("IAM"));
            }
            _ => panic!("expected Authorization variant"),
        }
    }

    #[test]
    fn falls_back_to_generic_transient_message() {
        let err = ErrorClassifier::classify("somethingElse", "my-proj", "p:r:i", "weird failure");
        match err {
            ConnectorError::Transient { instance, message } => {
                assert_eq!(instance, "p:r:i");
                assert!(message.contains("weird failure"));
                assert!(message.contains("somethingElse"));
            }
            _ => panic!("expected Transient variant"),
        }
    }

    #[test]
    fn wraps_instance_name_parse_errors_as_configuration() {
        let parse_err = "bad"
            .parse::<crate::instance_name::InstanceName>()
            .unwrap_err();
        let err: ConnectorError = parse_err.into();
        assert!(matches!(err, ConnectorError::Configuration { .. }));
    }
}
