// crates/rule-arbiter-config/src/logging.rs
// ============================================================================
// Module: Logging Bootstrap
// Description: Tracing subscriber installation for rule service hosts.
// Purpose: Route library tracing events to stderr under one filter.
// Dependencies: tracing-subscriber
// ============================================================================

//! ## Overview
//! Library crates only emit `tracing` events. Hosts call [`init`] once at
//! startup; `RUST_LOG` takes precedence over the configured filter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ConfigError;
use crate::config::LoggingConfig;

// ============================================================================
// SECTION: Init
// ============================================================================

/// Installs the global subscriber: compact format on stderr.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the configured filter does not
/// parse and [`ConfigError::Logging`] when a global subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|err| ConfigError::Invalid(format!("logging.filter is invalid: {err}")))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
        .map_err(|err| ConfigError::Logging(err.to_string()))
}
