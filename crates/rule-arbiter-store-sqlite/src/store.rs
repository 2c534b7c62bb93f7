// crates/rule-arbiter-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable RunLog and ResultStore backed by SQLite.
// Purpose: Persist run lifecycle rows and committed results across restarts.
// Dependencies: rule-arbiter-core, rusqlite, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`SqliteStore`] keeps run log rows and committed results in one `SQLite`
//! database. Run ids come from the `run_log` rowid, so they stay unique
//! across restarts. Request and result payloads are stored with a sha256
//! digest and verified on every load; a mismatch fails closed as
//! corruption. The schema version is recorded in `store_meta` and an
//! unknown version is rejected at open.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use rule_arbiter_core::RequestHash;
use rule_arbiter_core::RequestKind;
use rule_arbiter_core::RunId;
use rule_arbiter_core::RunLog;
use rule_arbiter_core::RunLogEntry;
use rule_arbiter_core::RunState;
use rule_arbiter_core::StoreError;
use rule_arbiter_core::Timestamp;
use rule_arbiter_core::core::NewRunLogEntry;
use rule_arbiter_core::core::hashing::hash_bytes;
use rule_arbiter_core::interfaces::ResultStore;
use rule_arbiter_core::interfaces::StoredResult;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Hash algorithm label recorded with each payload.
const HASH_ALGORITHM: &str = "sha256";
/// Default maximum payload size accepted by the store.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Columns selected for run log rows, in [`RunLogRow`] order.
const RUN_LOG_COLUMNS: &str = "run_id, created_at, updated_at, state, request_kind, \
                               request_hash, request_bytes, request_bytes_hash, \
                               request_description, result_kind, result_description, message";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode.
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode.
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for [`SqliteStore`].
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `max_payload_bytes` must be greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Largest request or result payload accepted, in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl SqliteStoreConfig {
    /// Creates a configuration with defaults for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default payload limit.
const fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw request or result payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Payload exceeded the configured size limit.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "payload exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps an engine error to [`SqliteStoreError::Db`].
#[allow(clippy::needless_pass_by_value, reason = "Used as a map_err adapter.")]
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed run log and result store.
///
/// # Invariants
/// - Payload loads verify stored hashes before returning bytes.
/// - Connection access is serialized through a mutex.
#[derive(Clone)]
pub struct SqliteStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection.
    connection: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.config.path).finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens the store, creating the database and schema when missing.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is unusable, the database
    /// cannot be opened, or the stored schema version is unsupported.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        if config.max_payload_bytes == 0 {
            return Err(SqliteStoreError::Invalid(
                "max_payload_bytes must be greater than zero".to_string(),
            ));
        }
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        debug!(path = %config.path.display(), "opened sqlite run store");
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Returns the number of run log rows.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn run_count(&self) -> Result<u64, SqliteStoreError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(1) FROM run_log", [], |row| row.get(0))
            .map_err(db_error)?;
        u64::try_from(count).map_err(|_| SqliteStoreError::Corrupt("negative run count".to_string()))
    }

    /// Locks the connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    /// Rejects payloads above the configured limit.
    const fn ensure_payload_size(&self, bytes: &[u8]) -> Result<(), SqliteStoreError> {
        if bytes.len() > self.config.max_payload_bytes {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: self.config.max_payload_bytes,
                actual_bytes: bytes.len(),
            });
        }
        Ok(())
    }

    /// Inserts a pending run row and returns its run id.
    fn insert_run(&self, entry: &NewRunLogEntry) -> Result<RunId, SqliteStoreError> {
        self.ensure_payload_size(&entry.request_bytes)?;
        let bytes_hash = hash_bytes(&entry.request_bytes);
        let connection = self.lock()?;
        connection
            .execute(
                "INSERT INTO run_log (created_at, updated_at, state, request_kind, request_hash, \
                 request_bytes, request_bytes_hash, request_description, result_kind) VALUES \
                 (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.created_at.as_unix_millis(),
                    RunState::Pending.as_str(),
                    entry.request_kind.as_str(),
                    entry.request_hash.as_str(),
                    entry.request_bytes,
                    bytes_hash.as_str(),
                    entry.request_description,
                    entry.result_kind,
                ],
            )
            .map_err(db_error)?;
        run_id_from_row(connection.last_insert_rowid())
    }

    /// Loads run rows matching a `WHERE` clause.
    fn query_runs(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RunLogEntry>, SqliteStoreError> {
        self.query_rows(clause, params)?.into_iter().map(RunLogRow::into_entry).collect()
    }

    /// Selects raw run rows matching `clause`.
    fn query_rows(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RunLogRow>, SqliteStoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!("SELECT {RUN_LOG_COLUMNS} FROM run_log {clause}"))
            .map_err(db_error)?;
        statement
            .query_map(params, RunLogRow::from_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)
    }

    /// Applies a run row update.
    fn update_run(&self, entry: &RunLogEntry) -> Result<(), SqliteStoreError> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE run_log SET updated_at = ?2, state = ?3, result_kind = ?4, \
                 result_description = ?5, message = ?6 WHERE run_id = ?1",
                params![
                    run_id_to_row(entry.run_id)?,
                    entry.updated_at.as_unix_millis(),
                    entry.state.as_str(),
                    entry.result_kind,
                    entry.result_description,
                    entry.message,
                ],
            )
            .map_err(db_error)?;
        if changed == 0 {
            return Err(SqliteStoreError::Invalid(format!("unknown run id {}", entry.run_id)));
        }
        Ok(())
    }

    /// Deletes rows last updated before `cutoff`.
    fn delete_runs(&self, cutoff: Timestamp) -> Result<Vec<RunId>, SqliteStoreError> {
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(db_error)?;
        let ids = {
            let mut statement = tx
                .prepare("SELECT run_id FROM run_log WHERE updated_at < ?1 ORDER BY run_id")
                .map_err(db_error)?;
            let rows = statement
                .query_map(params![cutoff.as_unix_millis()], |row| row.get::<_, i64>(0))
                .map_err(db_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_error)?;
            rows.into_iter().map(run_id_from_row).collect::<Result<Vec<_>, _>>()?
        };
        tx.execute("DELETE FROM run_log WHERE updated_at < ?1", params![cutoff.as_unix_millis()])
            .map_err(db_error)?;
        tx.commit().map_err(db_error)?;
        if !ids.is_empty() {
            info!(runs = ids.len(), "deleted expired run log rows");
        }
        Ok(ids)
    }

    /// Upserts a result row.
    fn save_result(&self, run_id: RunId, result: &StoredResult) -> Result<(), SqliteStoreError> {
        self.ensure_payload_size(&result.payload)?;
        let payload_hash = hash_bytes(&result.payload);
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO run_results (run_id, result_kind, payload, payload_hash, \
                 hash_algorithm, saved_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id_to_row(run_id)?,
                    result.result_kind,
                    result.payload,
                    payload_hash.as_str(),
                    HASH_ALGORITHM,
                    Timestamp::now().as_unix_millis(),
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }

    /// Loads and verifies a result row.
    fn load_result(&self, run_id: RunId) -> Result<Option<StoredResult>, SqliteStoreError> {
        let row = self
            .lock()?
            .query_row(
                "SELECT result_kind, payload, payload_hash, hash_algorithm FROM run_results \
                 WHERE run_id = ?1",
                params![run_id_to_row(run_id)?],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(db_error)?;
        let Some((result_kind, payload, payload_hash, algorithm)) = row else {
            return Ok(None);
        };
        verify_payload(&payload, &payload_hash, &algorithm, || format!("result of run {run_id}"))?;
        Ok(Some(StoredResult {
            result_kind,
            payload,
        }))
    }

    /// Deletes a result row.
    fn remove_result(&self, run_id: RunId) -> Result<bool, SqliteStoreError> {
        let changed = self
            .lock()?
            .execute("DELETE FROM run_results WHERE run_id = ?1", params![run_id_to_row(run_id)?])
            .map_err(db_error)?;
        Ok(changed > 0)
    }
}

impl RunLog for SqliteStore {
    fn create(&self, entry: NewRunLogEntry) -> Result<RunLogEntry, StoreError> {
        let run_id = self.insert_run(&entry)?;
        Ok(RunLogEntry::pending(run_id, entry))
    }

    fn find(&self, run_id: RunId) -> Result<Option<RunLogEntry>, StoreError> {
        let id = run_id_to_row(run_id)?;
        Ok(self.query_runs("WHERE run_id = ?1", params![id])?.into_iter().next())
    }

    fn find_by_request(
        &self,
        kind: &RequestKind,
        hash: &RequestHash,
    ) -> Result<Vec<RunLogEntry>, StoreError> {
        let rows = self.query_rows(
            "WHERE request_kind = ?1 AND request_hash = ?2 ORDER BY created_at DESC, run_id DESC",
            params![kind.as_str(), hash.as_str()],
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let run_id = row.run_id;
                match row.into_entry() {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(run_id, error = %err, "skipping undecodable run log row");
                        None
                    }
                }
            })
            .collect())
    }

    fn update(&self, entry: &RunLogEntry) -> Result<(), StoreError> {
        Ok(self.update_run(entry)?)
    }

    fn delete_older_than(&self, cutoff: Timestamp) -> Result<Vec<RunId>, StoreError> {
        Ok(self.delete_runs(cutoff)?)
    }
}

impl ResultStore for SqliteStore {
    fn save(&self, run_id: RunId, result: &StoredResult) -> Result<(), StoreError> {
        Ok(self.save_result(run_id, result)?)
    }

    fn load(&self, run_id: RunId) -> Result<Option<StoredResult>, StoreError> {
        Ok(self.load_result(run_id)?)
    }

    fn remove(&self, run_id: RunId) -> Result<bool, StoreError> {
        Ok(self.remove_result(run_id)?)
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Raw run log row before validation.
struct RunLogRow {
    /// Rowid.
    run_id: i64,
    /// Creation time in unix millis.
    created_at: i64,
    /// Update time in unix millis.
    updated_at: i64,
    /// State label.
    state: String,
    /// Request kind.
    request_kind: String,
    /// Request hash.
    request_hash: String,
    /// Request payload.
    request_bytes: Vec<u8>,
    /// Digest of the request payload.
    request_bytes_hash: String,
    /// Request description.
    request_description: String,
    /// Result kind.
    result_kind: Option<String>,
    /// Result description.
    result_description: Option<String>,
    /// Failure detail.
    message: Option<String>,
}

impl RunLogRow {
    /// Reads a row selected with [`RUN_LOG_COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            state: row.get(3)?,
            request_kind: row.get(4)?,
            request_hash: row.get(5)?,
            request_bytes: row.get(6)?,
            request_bytes_hash: row.get(7)?,
            request_description: row.get(8)?,
            result_kind: row.get(9)?,
            result_description: row.get(10)?,
            message: row.get(11)?,
        })
    }

    /// Validates the row and converts it to an entry.
    fn into_entry(self) -> Result<RunLogEntry, SqliteStoreError> {
        let run_id = run_id_from_row(self.run_id)?;
        verify_payload(&self.request_bytes, &self.request_bytes_hash, HASH_ALGORITHM, || {
            format!("request of run {run_id}")
        })?;
        let state = RunState::parse(&self.state).ok_or_else(|| {
            SqliteStoreError::Corrupt(format!("run {run_id} has unknown state {}", self.state))
        })?;
        Ok(RunLogEntry {
            run_id,
            created_at: Timestamp::from_unix_millis(self.created_at),
            updated_at: Timestamp::from_unix_millis(self.updated_at),
            state,
            request_kind: RequestKind::new(self.request_kind),
            request_hash: RequestHash::new(self.request_hash),
            request_bytes: self.request_bytes,
            request_description: self.request_description,
            result_kind: self.result_kind,
            result_description: self.result_description,
            message: self.message,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts a run id to a rowid.
fn run_id_to_row(run_id: RunId) -> Result<i64, SqliteStoreError> {
    i64::try_from(run_id.get())
        .map_err(|_| SqliteStoreError::Invalid(format!("run id {run_id} out of range")))
}

/// Converts a rowid to a run id.
fn run_id_from_row(row_id: i64) -> Result<RunId, SqliteStoreError> {
    u64::try_from(row_id)
        .map(RunId::new)
        .map_err(|_| SqliteStoreError::Corrupt(format!("negative run id {row_id}")))
}

/// Verifies a payload against its stored digest.
fn verify_payload(
    bytes: &[u8],
    expected: &str,
    algorithm: &str,
    what: impl FnOnce() -> String,
) -> Result<(), SqliteStoreError> {
    if algorithm != HASH_ALGORITHM {
        return Err(SqliteStoreError::Invalid(format!("unsupported hash algorithm: {algorithm}")));
    }
    if hash_bytes(bytes).as_str() != expected {
        return Err(SqliteStoreError::Corrupt(format!("hash mismatch for {}", what())));
    }
    Ok(())
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    if path.display().to_string().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    if path
        .components()
        .any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(SqliteStoreError::Invalid(
            "store path contains an overlong component".to_string(),
        ));
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with the configured pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    Ok(connection)
}

/// Creates the schema or validates the stored version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS run_log (
                    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    state TEXT NOT NULL,
                    request_kind TEXT NOT NULL,
                    request_hash TEXT NOT NULL,
                    request_bytes BLOB NOT NULL,
                    request_bytes_hash TEXT NOT NULL,
                    request_description TEXT NOT NULL,
                    result_kind TEXT,
                    result_description TEXT,
                    message TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_run_log_request
                    ON run_log (request_kind, request_hash);
                CREATE INDEX IF NOT EXISTS idx_run_log_updated_at
                    ON run_log (updated_at);
                CREATE TABLE IF NOT EXISTS run_results (
                    run_id INTEGER PRIMARY KEY,
                    result_kind TEXT NOT NULL,
                    payload BLOB NOT NULL,
                    payload_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );",
            )
            .map_err(db_error)?;
            info!(version = SCHEMA_VERSION, "initialized sqlite run store schema");
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
