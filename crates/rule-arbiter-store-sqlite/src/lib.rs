// crates/rule-arbiter-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable RunLog and ResultStore backend using SQLite WAL.
// Purpose: Keep run history and committed results across process restarts.
// Dependencies: rule-arbiter-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`RunLog`] and [`ResultStore`] for the
//! rule service. Run ids are allocated by the database, request and result
//! payloads carry a sha256 digest that is checked on every load, and expired
//! rows are pruned by `updated_at`.
//!
//! [`RunLog`]: rule_arbiter_core::RunLog
//! [`ResultStore`]: rule_arbiter_core::ResultStore

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::DEFAULT_MAX_PAYLOAD_BYTES;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
