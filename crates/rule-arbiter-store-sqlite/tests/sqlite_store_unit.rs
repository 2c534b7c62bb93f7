// crates/rule-arbiter-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Integrity Unit Tests
// Description: Targeted tests for the SQLite run log and result store.
// Purpose: Validate path safety, schema versioning, ordering, retention,
//          and corruption detection.
// ============================================================================

//! ## Overview
//! Unit-level tests for `SQLite` store invariants:
//! - Path safety checks (directory rejection)
//! - Schema version validation
//! - Newest-first request lookups and persistence across reopen
//! - Payload integrity and size limits
//! - Retention pruning
//! - End-to-end use behind a rule service

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rule_arbiter_core::Arbiter;
use rule_arbiter_core::ArbiterRegistration;
use rule_arbiter_core::ArbiterRegistry;
use rule_arbiter_core::NewRunLogEntry;
use rule_arbiter_core::RequestHash;
use rule_arbiter_core::RequestKind;
use rule_arbiter_core::RuleError;
use rule_arbiter_core::RuleRequest;
use rule_arbiter_core::RuleResult;
use rule_arbiter_core::RuleService;
use rule_arbiter_core::RunContext;
use rule_arbiter_core::RunId;
use rule_arbiter_core::RunLog;
use rule_arbiter_core::RunState;
use rule_arbiter_core::StoreError;
use rule_arbiter_core::Timestamp;
use rule_arbiter_core::interfaces::ResultStore;
use rule_arbiter_core::interfaces::StoredResult;
use rule_arbiter_store_sqlite::SqliteStore;
use rule_arbiter_store_sqlite::SqliteStoreConfig;
use rule_arbiter_store_sqlite::SqliteStoreError;
use rule_arbiter_store_sqlite::SqliteStoreMode;
use rusqlite::Connection;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open(path: &Path) -> SqliteStore {
    SqliteStore::new(SqliteStoreConfig::new(path)).unwrap()
}

fn new_entry(hash: &str, created_at: i64, bytes: &[u8]) -> NewRunLogEntry {
    NewRunLogEntry {
        created_at: Timestamp::from_unix_millis(created_at),
        request_kind: RequestKind::new("greeting"),
        request_hash: RequestHash::new(hash),
        request_bytes: bytes.to_vec(),
        request_description: format!("greeting({hash})"),
        result_kind: "greeting-result".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

impl RuleRequest for Greeting {
    const KIND: &'static str = "greeting";
    type Result = GreetingResult;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct GreetingResult {
    text: String,
}

impl RuleResult for GreetingResult {
    const KIND: &'static str = "greeting-result";
}

struct GreetingArbiter;

impl Arbiter<Greeting> for GreetingArbiter {
    fn before_session(
        &mut self,
        ctx: &RunContext<Greeting>,
        result: &mut GreetingResult,
    ) -> Result<(), RuleError> {
        result.text = format!("hello {}", ctx.request().name);
        Ok(())
    }
}

fn greeting_service(store: &Arc<SqliteStore>) -> RuleService {
    let mut registry = ArbiterRegistry::new();
    registry.register(ArbiterRegistration::new(|| GreetingArbiter)).unwrap();
    RuleService::builder(registry)
        .run_log(Arc::clone(store) as Arc<dyn RunLog>)
        .result_store(Arc::clone(store) as Arc<dyn ResultStore>)
        .build()
        .unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn sqlite_store_creates_finds_and_updates_runs() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("runs.sqlite"));

    let created = store.create(new_entry("h1", 1_000, b"{\"name\":\"a\"}")).unwrap();
    assert_eq!(created.state, RunState::Pending);
    assert_eq!(created.result_kind.as_deref(), Some("greeting-result"));

    let mut entry = store.find(created.run_id).unwrap().unwrap();
    assert_eq!(entry, created);

    entry.transition(RunState::Success, Timestamp::from_unix_millis(2_000));
    entry.result_description = Some("done".to_string());
    store.update(&entry).unwrap();

    let reloaded = store.find(created.run_id).unwrap().unwrap();
    assert_eq!(reloaded.state, RunState::Success);
    assert_eq!(reloaded.updated_at, Timestamp::from_unix_millis(2_000));
    assert_eq!(reloaded.result_description.as_deref(), Some("done"));
    assert!(store.find(RunId::new(999)).unwrap().is_none());
}

#[test]
fn sqlite_store_rejects_update_of_unknown_run() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("runs.sqlite"));
    let mut entry = store.create(new_entry("h1", 1_000, b"{}")).unwrap();
    entry.run_id = RunId::new(42);

    let err = store.update(&entry).unwrap_err();

    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn sqlite_store_lists_request_matches_newest_first() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("runs.sqlite"));
    let first = store.create(new_entry("same", 1_000, b"1")).unwrap();
    let second = store.create(new_entry("same", 3_000, b"2")).unwrap();
    let tied = store.create(new_entry("same", 3_000, b"3")).unwrap();
    store.create(new_entry("other", 5_000, b"4")).unwrap();

    let found = store
        .find_by_request(&RequestKind::new("greeting"), &RequestHash::new("same"))
        .unwrap();

    let ids: Vec<RunId> = found.iter().map(|entry| entry.run_id).collect();
    assert_eq!(ids, vec![tied.run_id, second.run_id, first.run_id]);
    assert!(
        store
            .find_by_request(&RequestKind::new("unknown"), &RequestHash::new("same"))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn sqlite_store_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("runs.sqlite");
    let run_id = {
        let store = open(&path);
        let entry = store.create(new_entry("h1", 1_000, b"payload")).unwrap();
        store
            .save(entry.run_id, &StoredResult {
                result_kind: "greeting-result".to_string(),
                payload: b"result".to_vec(),
            })
            .unwrap();
        entry.run_id
    };

    let store = open(&path);
    let entry = store.find(run_id).unwrap().unwrap();
    assert_eq!(entry.request_bytes, b"payload".to_vec());
    assert_eq!(store.load(run_id).unwrap().unwrap().payload, b"result".to_vec());

    let next = store.create(new_entry("h2", 2_000, b"next")).unwrap();
    assert!(next.run_id > run_id);
    assert_eq!(store.run_count().unwrap(), 2);
}

#[test]
fn sqlite_store_detects_tampered_request_bytes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("runs.sqlite");
    let store = open(&path);
    let entry = store.create(new_entry("h1", 1_000, b"original")).unwrap();

    let raw = Connection::open(&path).unwrap();
    raw.execute(
        "UPDATE run_log SET request_bytes = ?1 WHERE run_id = ?2",
        params![b"tampered".to_vec(), i64::try_from(entry.run_id.get()).unwrap()],
    )
    .unwrap();

    let err = store.find(entry.run_id).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt(_)));
}

#[test]
fn sqlite_store_request_lookup_skips_tampered_rows() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("runs.sqlite");
    let store = open(&path);
    let intact = store.create(new_entry("same", 1_000, b"intact")).unwrap();
    let damaged = store.create(new_entry("same", 2_000, b"damaged")).unwrap();

    let raw = Connection::open(&path).unwrap();
    raw.execute(
        "UPDATE run_log SET request_bytes = ?1 WHERE run_id = ?2",
        params![b"tampered".to_vec(), i64::try_from(damaged.run_id.get()).unwrap()],
    )
    .unwrap();

    let found = store
        .find_by_request(&RequestKind::new("greeting"), &RequestHash::new("same"))
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].run_id, intact.run_id);
    assert!(matches!(store.find(damaged.run_id).unwrap_err(), StoreError::Corrupt(_)));
}

#[test]
fn sqlite_store_detects_tampered_result_payload() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("runs.sqlite");
    let store = open(&path);
    let run_id = RunId::new(7);
    store
        .save(run_id, &StoredResult {
            result_kind: "greeting-result".to_string(),
            payload: b"stored".to_vec(),
        })
        .unwrap();

    let raw = Connection::open(&path).unwrap();
    raw.execute("UPDATE run_results SET payload = ?1 WHERE run_id = 7", params![b"x".to_vec()])
        .unwrap();

    assert!(matches!(store.load(run_id).unwrap_err(), StoreError::Corrupt(_)));
}

#[test]
fn sqlite_store_rejects_unknown_schema_version() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("runs.sqlite");
    drop(open(&path));

    let raw = Connection::open(&path).unwrap();
    raw.execute("UPDATE store_meta SET version = 99", params![]).unwrap();
    drop(raw);

    let err = SqliteStore::new(SqliteStoreConfig::new(&path)).unwrap_err();
    assert!(matches!(err, SqliteStoreError::VersionMismatch(_)));
}

#[test]
fn sqlite_store_rejects_directory_path() {
    let temp = TempDir::new().unwrap();

    let err = SqliteStore::new(SqliteStoreConfig::new(temp.path())).unwrap_err();

    assert!(matches!(err, SqliteStoreError::Invalid(_)));
}

#[test]
fn sqlite_store_enforces_payload_limit() {
    let temp = TempDir::new().unwrap();
    let config = SqliteStoreConfig {
        max_payload_bytes: 4,
        journal_mode: SqliteStoreMode::Delete,
        ..SqliteStoreConfig::new(temp.path().join("runs.sqlite"))
    };
    let store = SqliteStore::new(config).unwrap();

    let err = store.create(new_entry("h1", 1_000, b"too large")).unwrap_err();

    assert!(matches!(err, StoreError::Invalid(_)));
    assert_eq!(store.run_count().unwrap(), 0);
}

#[test]
fn sqlite_store_deletes_rows_older_than_cutoff() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("runs.sqlite"));
    let old = store.create(new_entry("a", 1_000, b"1")).unwrap();
    let kept = store.create(new_entry("b", 9_000, b"2")).unwrap();

    let removed = store.delete_older_than(Timestamp::from_unix_millis(5_000)).unwrap();

    assert_eq!(removed, vec![old.run_id]);
    assert!(store.find(old.run_id).unwrap().is_none());
    assert!(store.find(kept.run_id).unwrap().is_some());
}

#[test]
fn sqlite_store_saves_loads_and_removes_results() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp.path().join("runs.sqlite"));
    let run_id = RunId::new(3);
    let first = StoredResult {
        result_kind: "greeting-result".to_string(),
        payload: b"one".to_vec(),
    };
    let second = StoredResult {
        result_kind: "greeting-result".to_string(),
        payload: b"two".to_vec(),
    };

    store.save(run_id, &first).unwrap();
    store.save(run_id, &second).unwrap();

    assert_eq!(store.load(run_id).unwrap(), Some(second));
    assert!(store.remove(run_id).unwrap());
    assert!(!store.remove(run_id).unwrap());
    assert!(store.load(run_id).unwrap().is_none());
}

#[test]
fn rule_service_records_runs_in_sqlite() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(open(&temp.path().join("runs.sqlite")));
    let request = Greeting {
        name: "ada".to_string(),
    };

    let run_id = {
        let service = greeting_service(&store);
        let handle = service.submit(request.clone()).unwrap();
        let run_id = handle.run_id();
        let result = handle.wait().unwrap();
        assert_eq!(result.text, "hello ada");
        run_id
    };

    let service = greeting_service(&store);
    assert_eq!(service.get_state(run_id).unwrap(), Some(RunState::Success));
    assert_eq!(service.find_id(&request).unwrap(), Some(run_id));
    let stored = service.get_result::<GreetingResult>(run_id).unwrap().unwrap();
    assert_eq!(stored.text, "hello ada");

    thread::sleep(Duration::from_millis(10));
    assert_eq!(service.purge_older_than(Duration::ZERO).unwrap(), 1);
    assert!(service.get_state(run_id).unwrap().is_none());
    assert!(store.load(run_id).unwrap().is_none());
}
