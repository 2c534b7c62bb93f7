// crates/rule-arbiter-core/src/core/time.rs
// ============================================================================
// Module: Rule Arbiter Time Model
// Description: Wall-clock timestamps for run log records.
// Purpose: Give run log entries a stable, serializable time representation.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Run log rows carry creation and update times as unix milliseconds. The
//! service reads the wall clock through [`Timestamp::now`]; stores persist the
//! raw millisecond value.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Returns the timestamp as unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp shifted back by `age`, saturating at the epoch floor.
    #[must_use]
    pub fn saturating_sub(self, age: Duration) -> Self {
        let millis = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(millis))
    }
}
