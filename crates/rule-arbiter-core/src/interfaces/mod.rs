// crates/rule-arbiter-core/src/interfaces/mod.rs
// ============================================================================
// Module: Rule Arbiter Interfaces
// Description: Contracts for rule sessions, containers, run logs, and stores.
// Purpose: Define the external collaborator surfaces used by the runtime.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The orchestrator never evaluates rules or persists data itself. It drives a
//! [`RuleSession`] obtained from a [`RuleContainer`], records lifecycle state
//! through a [`RunLog`], and keeps committed results in a [`ResultStore`].
//! Implementations must be safe to call from several worker threads at once,
//! so every method takes `&self`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::RequestHash;
use crate::core::identifiers::ContainerId;
use crate::core::identifiers::RequestKind;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;
use crate::core::rule_info::RuleInfo;
use crate::core::run_log::NewRunLogEntry;
use crate::core::run_log::RunLogEntry;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Facts and Globals
// ============================================================================

/// Working-memory object inserted into a rule session.
pub type Fact = Arc<dyn Any + Send + Sync>;

/// Named value shared with every rule in a session.
pub type Global = Arc<dyn Any + Send + Sync>;

/// Wraps a value as a fact.
#[must_use]
pub fn fact<T: Any + Send + Sync>(value: T) -> Fact {
    Arc::new(value)
}

// ============================================================================
// SECTION: Rule Session
// ============================================================================

/// Rule session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Evaluation stopped because the session was halted.
    #[error("rule session halted")]
    Halted,
    /// The session was already closed.
    #[error("rule session closed")]
    Closed,
    /// The container does not provide the requested session.
    #[error("session {0} is not provided by the container")]
    NotProvided(SessionId),
    /// Rule evaluation failed.
    #[error("rule evaluation failed: {0}")]
    Evaluation(String),
    /// The engine reported an error.
    #[error("rule session error: {0}")]
    Session(String),
}

/// Working-memory and evaluation handle of the rule engine.
pub trait RuleSession: Send + Sync {
    /// Inserts a fact into working memory.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the session rejects the fact.
    fn insert(&self, fact: Fact) -> Result<(), SessionError>;

    /// Returns every fact currently in working memory.
    fn facts(&self) -> Vec<Fact>;

    /// Returns the number of facts in working memory.
    fn fact_count(&self) -> usize {
        self.facts().len()
    }

    /// Sets a named global.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the global cannot be set.
    fn set_global(&self, name: &str, value: Global) -> Result<(), SessionError>;

    /// Returns a named global.
    fn global(&self, name: &str) -> Option<Global>;

    /// Fires rules until quiescence or halt, returning the number fired.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when evaluation fails.
    fn run_rules(&self) -> Result<u64, SessionError>;

    /// Asks an in-progress evaluation to stop. Must be callable from any thread.
    fn halt(&self);

    /// Returns the number of rules the session can fire.
    fn rule_count(&self) -> usize;

    /// Returns cumulative fire counts keyed by rule identifier.
    fn rule_histogram(&self) -> BTreeMap<String, u64>;

    /// Releases the session. Must succeed after [`RuleSession::halt`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when release fails.
    fn close(&self) -> Result<(), SessionError>;
}

/// Typed access helpers over [`RuleSession`].
pub trait RuleSessionExt {
    /// Returns every fact of type `T`.
    fn facts_of<T: Any + Send + Sync>(&self) -> Vec<Arc<T>>;

    /// Returns the named global when it holds a `T`.
    fn global_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>>;
}

impl<S: RuleSession + ?Sized> RuleSessionExt for S {
    fn facts_of<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.facts().into_iter().filter_map(|fact| fact.downcast::<T>().ok()).collect()
    }

    fn global_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.global(name).and_then(|value| value.downcast::<T>().ok())
    }
}

// ============================================================================
// SECTION: Rule Container
// ============================================================================

/// Versioned bundle of rule sessions.
pub trait RuleContainer: Send + Sync {
    /// Returns the container identifier.
    fn id(&self) -> ContainerId;

    /// Returns the sessions the container currently provides.
    fn provided_sessions(&self) -> BTreeSet<SessionId>;

    /// Opens a new session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the session cannot be created.
    fn new_session(&self, session: &SessionId) -> Result<Box<dyn RuleSession>, SessionError>;

    /// Describes the knowledge items the container carries.
    fn rule_info(&self) -> Vec<RuleInfo>;
}

// ============================================================================
// SECTION: Stores
// ============================================================================

/// Run log and result store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("run store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("run store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("run store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("run store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("run store error: {0}")]
    Store(String),
}

/// Persistent record of run lifecycle state.
pub trait RunLog: Send + Sync {
    /// Allocates a run id and stores the pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the entry cannot be stored.
    fn create(&self, entry: NewRunLogEntry) -> Result<RunLogEntry, StoreError>;

    /// Loads an entry by run id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn find(&self, run_id: RunId) -> Result<Option<RunLogEntry>, StoreError>;

    /// Returns entries matching the request kind and hash, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    fn find_by_request(
        &self,
        kind: &RequestKind,
        hash: &RequestHash,
    ) -> Result<Vec<RunLogEntry>, StoreError>;

    /// Replaces a stored entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the entry is unknown or cannot be written.
    fn update(&self, entry: &RunLogEntry) -> Result<(), StoreError>;

    /// Deletes entries last updated before `cutoff`, returning their run ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn delete_older_than(&self, cutoff: Timestamp) -> Result<Vec<RunId>, StoreError>;
}

/// Serialized result payload tagged with its result kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResult {
    /// Result kind tag.
    pub result_kind: String,
    /// Serialized result bytes.
    pub payload: Vec<u8>,
}

/// Storage for committed results.
pub trait ResultStore: Send + Sync {
    /// Saves the committed result of a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save(&self, run_id: RunId, result: &StoredResult) -> Result<(), StoreError>;

    /// Loads the committed result of a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load(&self, run_id: RunId) -> Result<Option<StoredResult>, StoreError>;

    /// Removes the result of a run, returning true when one existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn remove(&self, run_id: RunId) -> Result<bool, StoreError>;
}

// ============================================================================
// SECTION: Serializer
// ============================================================================

/// Serializer errors.
#[derive(Debug, Error)]
pub enum SerializerError {
    /// Encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),
    /// Decoding failed.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Byte codec for stored requests and results.
pub trait Serializer: Send + Sync {
    /// Encodes a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Encode`] when encoding fails.
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError>;

    /// Decodes a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`SerializerError::Decode`] when decoding fails.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError>;
}

/// Plain JSON serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        serde_json::to_vec(value).map_err(|err| SerializerError::Encode(err.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializerError> {
        serde_json::from_slice(bytes).map_err(|err| SerializerError::Decode(err.to_string()))
    }
}
