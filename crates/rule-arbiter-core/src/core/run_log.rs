// crates/rule-arbiter-core/src/core/run_log.rs
// ============================================================================
// Module: Rule Arbiter Run Log Model
// Description: Run lifecycle states and run log records.
// Purpose: Define the row shape the service writes at every state transition.
// Dependencies: serde, crate::core::{hashing, identifiers, time}
// ============================================================================

//! ## Overview
//! Every scheduled run owns exactly one [`RunLogEntry`]. The entry is created
//! as [`RunState::Pending`], moves to [`RunState::Running`] when a pool worker
//! picks it up, and ends as `Success`, `Failure`, or `Canceled`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::RequestHash;
use crate::core::identifiers::RequestKind;
use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run State
// ============================================================================

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Scheduled but not yet picked up by a worker.
    Pending,
    /// Pipeline executing.
    Running,
    /// Pipeline completed and the result was stored.
    Success,
    /// Pipeline failed; the entry message carries the error text.
    Failure,
    /// Pipeline was cancelled.
    Canceled,
}

impl RunState {
    /// Returns the stable label persisted by stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Canceled => "CANCELED",
        }
    }

    /// Parses a persisted label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Returns true for states no further transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Canceled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Run Log Entries
// ============================================================================

/// Fields supplied when a run is first scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRunLogEntry {
    /// Creation time.
    pub created_at: Timestamp,
    /// Request kind tag.
    pub request_kind: RequestKind,
    /// Request content hash.
    pub request_hash: RequestHash,
    /// Serialized request bytes.
    pub request_bytes: Vec<u8>,
    /// Request description.
    pub request_description: String,
    /// Bound result kind tag.
    pub result_kind: String,
}

/// Persisted run log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    /// Run identifier assigned by the log.
    pub run_id: RunId,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time.
    pub updated_at: Timestamp,
    /// Current lifecycle state.
    pub state: RunState,
    /// Request kind tag.
    pub request_kind: RequestKind,
    /// Request content hash.
    pub request_hash: RequestHash,
    /// Serialized request bytes.
    pub request_bytes: Vec<u8>,
    /// Request description.
    pub request_description: String,
    /// Bound result kind tag.
    pub result_kind: Option<String>,
    /// Result description, set on success.
    pub result_description: Option<String>,
    /// Failure detail, set on failure.
    pub message: Option<String>,
}

impl RunLogEntry {
    /// Builds the initial pending row for a newly allocated run id.
    #[must_use]
    pub fn pending(run_id: RunId, entry: NewRunLogEntry) -> Self {
        Self {
            run_id,
            created_at: entry.created_at,
            updated_at: entry.created_at,
            state: RunState::Pending,
            request_kind: entry.request_kind,
            request_hash: entry.request_hash,
            request_bytes: entry.request_bytes,
            request_description: entry.request_description,
            result_kind: Some(entry.result_kind),
            result_description: None,
            message: None,
        }
    }

    /// Moves the entry to `state` and stamps the update time.
    pub const fn transition(&mut self, state: RunState, at: Timestamp) {
        self.state = state;
        self.updated_at = at;
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
