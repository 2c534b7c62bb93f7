// crates/rule-arbiter-core/src/core/identifiers.rs
// ============================================================================
// Module: Rule Arbiter Identifiers
// Description: Canonical identifiers for runs, sessions, containers, and processors.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Run identifiers are numeric and allocated by the run log (or a process-local
//! counter when no log is configured). Every other identifier is an opaque
//! string wrapper. Identifiers are compared exactly; validation of emptiness
//! happens at registration boundaries rather than inside these wrappers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Run Identifier
// ============================================================================

/// Identifier of a single pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    /// Creates a run identifier from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for RunId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: String Identifiers
// ============================================================================

/// Declares an opaque string identifier with the shared accessor surface.
macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true when the identifier is empty or whitespace only.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_identifier! {
    /// Request-type tag used to key arbiter and session registrations.
    RequestKind
}

string_identifier! {
    /// Logical rule session identifier resolved through registered containers.
    SessionId
}

string_identifier! {
    /// Rule container identifier.
    ContainerId
}

string_identifier! {
    /// Investigator identifier, unique within one request kind.
    InvestigatorId
}
