//! Global `tracing` subscriber initialization for the refresh engine.
//!
//! Follows the shape of `telemetry::init_tracing` elsewhere in this
//! codebase: the same idempotent `AtomicBool` guard, `LogTracer` bridge (so
//! any `log::` macros pulled in by a dependency still surface), and
//! env-filter-first-then-configured-level fallback, but driven by
//! [`ConnectorConfig`] instead of an HTTP service's `AppConfig`.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::ConnectorConfig;

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes global tracing/logging exactly once, honoring `RUST_LOG` if
/// set and falling back to `config.log_level` otherwise. Safe to call
/// multiple times (e.g. once per crate embedding this one); later calls are
/// no-ops.
pub fn init_tracing(config: &ConnectorConfig) -> Result<(), LoggingInitError> {
    if LOGGING_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder().with_max_level(LevelFilter::Trace).init() {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "warning: failed to install log tracer bridge: {err}; `log::` macros will not \
                 route through tracing"
            );
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "warning: failed to set global tracing subscriber: {err}; default subscriber remains \
             in effect"
        );
    }

    Ok(())
}
