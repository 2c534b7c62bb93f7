// crates/rule-arbiter-core/src/core/request.rs
// ============================================================================
// Module: Rule Arbiter Requests
// Description: Request and result contracts evaluated by arbiters.
// Purpose: Bind each request type to its result type and hashing behavior.
// Dependencies: serde, crate::core::hashing
// ============================================================================

//! ## Overview
//! A [`RuleRequest`] is the immutable input to a run; its associated
//! [`RuleRequest::Result`] is the mutable output that rules populate. The
//! request kind tag keys arbiter and session registrations, while the request
//! hash nominates deduplication candidates in the run log.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::error::RuleError;
use crate::core::hashing::RequestHash;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::RequestKind;

// ============================================================================
// SECTION: Result Contract
// ============================================================================

/// Output of a rule run.
///
/// `Default` provides the zero-argument construction path used when an
/// arbiter does not override [`crate::runtime::Arbiter::new_result`].
pub trait RuleResult:
    Serialize + DeserializeOwned + Clone + Default + Debug + Send + Sync + 'static
{
    /// Stable type tag recorded alongside persisted results.
    const KIND: &'static str;

    /// Human-readable description used in logs.
    fn describe(&self) -> String {
        Self::KIND.to_string()
    }
}

// ============================================================================
// SECTION: Request Contract
// ============================================================================

/// Input to a rule run.
pub trait RuleRequest:
    Serialize + DeserializeOwned + PartialEq + Clone + Debug + Send + Sync + 'static
{
    /// Stable type tag keying registrations for this request type.
    const KIND: &'static str;

    /// Result type produced for this request.
    type Result: RuleResult;

    /// Returns the request kind as an identifier.
    #[must_use]
    fn kind() -> RequestKind {
        RequestKind::new(Self::KIND)
    }

    /// Human-readable description used in logs and failure messages.
    fn describe(&self) -> String {
        Self::KIND.to_string()
    }

    /// Returns the content hash used to look up prior runs.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Serialization`] when the request cannot be
    /// canonicalized.
    fn request_hash(&self) -> Result<RequestHash, RuleError> {
        hash_canonical_json(self).map_err(|err| RuleError::Serialization(err.to_string()))
    }
}
