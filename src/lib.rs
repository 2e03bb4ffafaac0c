//! # dbconnector
//!
//! A client-side mTLS credential refresh engine. Database drivers call into
//! [`registry::InstanceRegistry`] and [`dialer::Dialer`] to open
//! mutually-authenticated TLS connections to managed database instances
//! without any manual certificate provisioning: a background scheduler keeps
//! each instance's ephemeral client certificate and trusted server CA fresh,
//! and callers always see a consistent, same-cycle bundle of the two.

pub mod admin_api;
pub mod config;
pub mod dialer;
pub mod drivers;
pub mod error;
pub mod instance_name;
pub mod keys;
pub mod logging;
pub mod metadata;
pub mod refresh;
pub mod registry;
pub mod tls;
