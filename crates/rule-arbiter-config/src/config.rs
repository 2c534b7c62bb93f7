// crates/rule-arbiter-config/src/config.rs
// ============================================================================
// Module: Rule Arbiter Configuration
// Description: Configuration loading and validation for the rule service.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: rule-arbiter-core, rule-arbiter-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Unknown fields, zero pool sizes, and incomplete store settings are
//! rejected rather than defaulted. A validated [`ArbiterConfig`] converts
//! into the core [`RuleServiceConfig`] and builds the configured run log
//! and result store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rule_arbiter_core::ArbiterRegistry;
use rule_arbiter_core::ResultStore;
use rule_arbiter_core::RuleError;
use rule_arbiter_core::RuleService;
use rule_arbiter_core::RunLog;
use rule_arbiter_core::SessionFactory;
use rule_arbiter_core::runtime::FullQueuePolicy;
use rule_arbiter_core::runtime::InMemoryResultStore;
use rule_arbiter_core::runtime::InMemoryRunLog;
use rule_arbiter_core::runtime::RuleServiceConfig;
use rule_arbiter_core::runtime::service::DEFAULT_ARBITER_POOL_SIZE;
use rule_arbiter_core::runtime::service::DEFAULT_ARBITER_QUEUE_CAPACITY;
use rule_arbiter_core::runtime::service::DEFAULT_INVESTIGATOR_POOL_SIZE;
use rule_arbiter_store_sqlite::DEFAULT_MAX_PAYLOAD_BYTES;
use rule_arbiter_store_sqlite::SqliteStore;
use rule_arbiter_store_sqlite::SqliteStoreConfig;
use rule_arbiter_store_sqlite::SqliteStoreError;
use rule_arbiter_store_sqlite::SqliteStoreMode;
use rule_arbiter_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "rule-arbiter.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "RULE_ARBITER_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Upper bound for either pool size.
const MAX_POOL_SIZE: usize = 1024;
/// Upper bound for either queue capacity.
const MAX_QUEUE_CAPACITY: usize = 1_000_000;
/// Longest accepted container refresh interval (one day).
const MAX_REFRESH_INTERVAL_SECS: u64 = 86_400;
/// Longest accepted run log retention (one hundred years).
const MAX_RETENTION_DAYS: u64 = 36_500;
/// Seconds per retention day.
const SECONDS_PER_DAY: u64 = 86_400;
/// Default `SQLite` busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default log filter directive.
const DEFAULT_LOG_FILTER: &str = "warn";

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Rule service configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArbiterConfig {
    /// Worker pool configuration.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Fact gathering configuration.
    #[serde(default)]
    pub facts: FactsConfig,
    /// Run log and result store configuration.
    #[serde(default)]
    pub run_log: RunLogConfig,
    /// Container configuration.
    #[serde(default)]
    pub containers: ContainersConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ArbiterConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path argument wins, then [`CONFIG_ENV_VAR`], then
    /// `rule-arbiter.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config = Self::parse(content)?;
        info!(path = %resolved.display(), "loaded rule arbiter config");
        Ok(config)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor.validate()?;
        self.run_log.validate()?;
        self.containers.validate()?;
        self.logging.validate()
    }

    /// Returns the core service configuration.
    #[must_use]
    pub const fn service_config(&self) -> RuleServiceConfig {
        RuleServiceConfig {
            arbiter_pool_size: self.executor.arbiter_pool_size,
            arbiter_queue_capacity: self.executor.arbiter_queue_capacity,
            investigator_pool_size: self.executor.investigator_pool_size,
            investigator_queue_capacity: self.executor.investigator_queue_capacity,
            full_queue_policy: self.executor.full_queue_policy,
            parallel_facts: self.facts.parallel,
        }
    }

    /// Builds the configured stores.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Store`] when the `SQLite` store cannot open.
    pub fn build_stores(&self) -> Result<ConfiguredStores, ConfigError> {
        self.run_log.build()
    }

    /// Builds a rule service from this configuration.
    ///
    /// Starts the container refresh worker when an interval is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a store cannot open or the service
    /// cannot start.
    pub fn build_service(&self, registry: ArbiterRegistry) -> Result<RuleService, ConfigError> {
        let stores = self.build_stores()?;
        let sessions = Arc::new(SessionFactory::new());
        if let Some(interval) = self.containers.refresh_interval() {
            sessions.start_refresh(interval)?;
        }
        let mut builder = RuleService::builder(registry)
            .sessions(sessions)
            .result_store(stores.results)
            .config(self.service_config());
        if let Some(run_log) = stores.run_log {
            builder = builder.run_log(run_log);
        }
        Ok(builder.build()?)
    }

    /// Purges runs older than the configured retention.
    ///
    /// Returns zero when no retention is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Service`] when the purge fails.
    pub fn purge_expired(&self, service: &RuleService) -> Result<usize, ConfigError> {
        match self.run_log.retention() {
            Some(age) => Ok(service.purge_older_than(age)?),
            None => Ok(0),
        }
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Concurrent runs.
    #[serde(default = "default_arbiter_pool_size")]
    pub arbiter_pool_size: usize,
    /// Runs queued beyond the running ones.
    #[serde(default = "default_arbiter_queue_capacity")]
    pub arbiter_queue_capacity: usize,
    /// Concurrent investigator tasks.
    #[serde(default = "default_investigator_pool_size")]
    pub investigator_pool_size: usize,
    /// Investigator tasks queued beyond the running ones; unset sizes the
    /// queue from `arbiter_pool_size`.
    #[serde(default)]
    pub investigator_queue_capacity: Option<usize>,
    /// Behavior when a queue is full.
    #[serde(default)]
    pub full_queue_policy: FullQueuePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            arbiter_pool_size: default_arbiter_pool_size(),
            arbiter_queue_capacity: default_arbiter_queue_capacity(),
            investigator_pool_size: default_investigator_pool_size(),
            investigator_queue_capacity: None,
            full_queue_policy: FullQueuePolicy::default(),
        }
    }
}

impl ExecutorConfig {
    /// Validates pool sizing.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_range("executor.arbiter_pool_size", self.arbiter_pool_size, MAX_POOL_SIZE)?;
        validate_range(
            "executor.arbiter_queue_capacity",
            self.arbiter_queue_capacity,
            MAX_QUEUE_CAPACITY,
        )?;
        validate_range(
            "executor.investigator_pool_size",
            self.investigator_pool_size,
            MAX_POOL_SIZE,
        )?;
        match self.investigator_queue_capacity {
            Some(capacity) => validate_range(
                "executor.investigator_queue_capacity",
                capacity,
                MAX_QUEUE_CAPACITY,
            ),
            None => Ok(()),
        }
    }
}

/// Default arbiter pool size.
const fn default_arbiter_pool_size() -> usize {
    DEFAULT_ARBITER_POOL_SIZE
}

/// Default arbiter queue capacity.
const fn default_arbiter_queue_capacity() -> usize {
    DEFAULT_ARBITER_QUEUE_CAPACITY
}

/// Default investigator pool size.
const fn default_investigator_pool_size() -> usize {
    DEFAULT_INVESTIGATOR_POOL_SIZE
}

// ============================================================================
// SECTION: Facts
// ============================================================================

/// Fact gathering configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactsConfig {
    /// Gather independent investigators concurrently.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
        }
    }
}

/// Parallel gathering is on unless disabled.
const fn default_parallel() -> bool {
    true
}

// ============================================================================
// SECTION: Run Log
// ============================================================================

/// Run log backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunLogBackend {
    /// No run log; ids are process-local and results live in memory.
    None,
    /// In-memory run log and result store.
    #[default]
    Memory,
    /// `SQLite`-backed durable run log and result store.
    Sqlite,
}

/// Run log and result store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunLogConfig {
    /// Store backend.
    #[serde(default)]
    pub backend: RunLogBackend,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Largest stored payload in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Days a run is kept after its last update.
    #[serde(default)]
    pub retention_days: Option<u64>,
}

impl Default for RunLogConfig {
    fn default() -> Self {
        Self {
            backend: RunLogBackend::default(),
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_payload_bytes: default_max_payload_bytes(),
            retention_days: None,
        }
    }
}

impl RunLogConfig {
    /// Validates run log configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            RunLogBackend::None | RunLogBackend::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "run_log path is only valid for the sqlite backend".to_string(),
                    ));
                }
            }
            RunLogBackend::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite run_log requires path".to_string())
                })?;
                validate_store_path(path)?;
                if self.max_payload_bytes == 0 {
                    return Err(ConfigError::Invalid(
                        "run_log.max_payload_bytes must be greater than zero".to_string(),
                    ));
                }
            }
        }
        if let Some(days) = self.retention_days {
            if self.backend == RunLogBackend::None {
                return Err(ConfigError::Invalid(
                    "run_log.retention_days requires a run log backend".to_string(),
                ));
            }
            validate_range("run_log.retention_days", days, MAX_RETENTION_DAYS)?;
        }
        Ok(())
    }

    /// Returns the configured retention as a duration.
    #[must_use]
    pub fn retention(&self) -> Option<Duration> {
        self.retention_days.map(|days| Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)))
    }

    /// Builds the configured stores.
    fn build(&self) -> Result<ConfiguredStores, ConfigError> {
        match self.backend {
            RunLogBackend::None => Ok(ConfiguredStores {
                run_log: None,
                results: Arc::new(InMemoryResultStore::new()),
            }),
            RunLogBackend::Memory => Ok(ConfiguredStores {
                run_log: Some(Arc::new(InMemoryRunLog::new())),
                results: Arc::new(InMemoryResultStore::new()),
            }),
            RunLogBackend::Sqlite => {
                let path = self.path.clone().ok_or_else(|| {
                    ConfigError::Invalid("sqlite run_log requires path".to_string())
                })?;
                let store = Arc::new(SqliteStore::new(SqliteStoreConfig {
                    path,
                    busy_timeout_ms: self.busy_timeout_ms,
                    journal_mode: self.journal_mode,
                    sync_mode: self.sync_mode,
                    max_payload_bytes: self.max_payload_bytes,
                })?);
                Ok(ConfiguredStores {
                    run_log: Some(Arc::clone(&store) as Arc<dyn RunLog>),
                    results: store,
                })
            }
        }
    }
}

/// Default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Default payload limit for the `SQLite` store.
const fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

/// Stores built from a [`RunLogConfig`].
#[derive(Clone)]
pub struct ConfiguredStores {
    /// Run log, absent for the `none` backend.
    pub run_log: Option<Arc<dyn RunLog>>,
    /// Result store.
    pub results: Arc<dyn ResultStore>,
}

// ============================================================================
// SECTION: Containers
// ============================================================================

/// Container configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainersConfig {
    /// Seconds between background container refreshes.
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
}

impl ContainersConfig {
    /// Validates the refresh interval.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secs) = self.refresh_interval_secs {
            validate_range("containers.refresh_interval_secs", secs, MAX_REFRESH_INTERVAL_SECS)?;
        }
        Ok(())
    }

    /// Returns the refresh interval, when configured.
    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl LoggingConfig {
    /// Validates the filter directive.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.filter must be non-empty".to_string()));
        }
        EnvFilter::try_new(&self.filter)
            .map_err(|err| ConfigError::Invalid(format!("logging.filter is invalid: {err}")))?;
        Ok(())
    }
}

/// Default log filter.
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Configured store failed to open.
    #[error("config store error: {0}")]
    Store(#[from] SqliteStoreError),
    /// Rule service failed to start or run.
    #[error("config service error: {0}")]
    Service(#[from] RuleError),
    /// Logging subscriber could not be installed.
    #[error("logging init error: {0}")]
    Logging(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the argument or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a store path before it reaches the store.
fn validate_store_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("run_log.path must be non-empty".to_string()));
    }
    validate_path(path)
}

/// Rejects zero and values above `max`.
fn validate_range<T>(field: &str, value: T, max: T) -> Result<(), ConfigError>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
    }
    if value > max {
        return Err(ConfigError::Invalid(format!("{field} must be at most {max}")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
