// crates/rule-arbiter-config/src/lib.rs
// ============================================================================
// Module: Rule Arbiter Config
// Description: TOML configuration and logging bootstrap for the rule service.
// Purpose: Turn a validated config file into a running RuleService.
// Dependencies: rule-arbiter-core, rule-arbiter-store-sqlite, toml, tracing-subscriber
// ============================================================================

//! ## Overview
//! [`ArbiterConfig`] parses `rule-arbiter.toml` with fail-closed validation,
//! converts it into the core service configuration, and builds the
//! configured run log backend. [`logging::init`] installs the tracing
//! subscriber for host processes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod logging;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ArbiterConfig;
pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::ConfiguredStores;
pub use config::ContainersConfig;
pub use config::ExecutorConfig;
pub use config::FactsConfig;
pub use config::LoggingConfig;
pub use config::RunLogBackend;
pub use config::RunLogConfig;
