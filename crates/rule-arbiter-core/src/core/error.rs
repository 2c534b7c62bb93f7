// crates/rule-arbiter-core/src/core/error.rs
// ============================================================================
// Module: Rule Arbiter Errors
// Description: Error taxonomy for registration, investigation, and pipeline runs.
// Purpose: Give every failure path a typed variant with a stable numeric code.
// Dependencies: thiserror, crate::{interfaces, runtime::pool}
// ============================================================================

//! ## Overview
//! [`RuleError`] is the single error type crossing the orchestration layer.
//! Cancellation is modelled as a variant so it can travel through `?`, but it
//! is a control path: [`RuleError::is_cancellation`] must be consulted before
//! treating an error as a failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use thiserror::Error;

use crate::core::identifiers::ContainerId;
use crate::core::identifiers::InvestigatorId;
use crate::core::identifiers::RequestKind;
use crate::interfaces::SerializerError;
use crate::interfaces::SessionError;
use crate::interfaces::StoreError;
use crate::runtime::pool::PoolError;

// ============================================================================
// SECTION: Processor Kind
// ============================================================================

/// Processor family bound to a request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    /// The arbiter that drives a run.
    Arbiter,
    /// An investigator that gathers facts.
    Investigator,
}

impl ProcessorKind {
    /// Returns the lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Arbiter => "arbiter",
            Self::Investigator => "investigator",
        }
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Rule Error
// ============================================================================

/// Errors raised by the orchestration layer.
#[derive(Debug, Error)]
pub enum RuleError {
    /// No arbiter or investigator is bound to the request kind.
    #[error("no {what} registered for request kind {kind}")]
    NotRegistered {
        /// Which processor family was missing.
        what: ProcessorKind,
        /// Request kind that was looked up.
        kind: RequestKind,
    },
    /// Registration metadata is malformed.
    #[error("invalid registration options: {0}")]
    MissingOptions(String),
    /// Investigator dependencies form a cycle.
    #[error("investigator dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
    /// A fresh result could not be constructed.
    #[error("failed to instantiate result {kind}: {message}")]
    ResultInstantiation {
        /// Result kind tag.
        kind: &'static str,
        /// Failure detail.
        message: String,
    },
    /// An investigator task failed for a reason other than cancellation.
    #[error("investigator {investigator} failed: {source}")]
    InvestigatorFailure {
        /// Failing investigator.
        investigator: InvestigatorId,
        /// Underlying failure.
        source: Box<RuleError>,
    },
    /// An uncaught failure inside the arbiter pipeline.
    #[error("failed to process request {request}: {source}")]
    ProcessFailure {
        /// Request description.
        request: String,
        /// Underlying failure.
        source: Box<RuleError>,
    },
    /// A container with the same identifier is already registered.
    #[error("container already registered: {0}")]
    DuplicateContainer(ContainerId),
    /// A request or result could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A stored request or result could not be deserialized.
    #[error("deserialization error: {0}")]
    Deserialization(String),
    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,
    /// A hook or investigator reported a domain failure.
    #[error("{0}")]
    Processor(String),
    /// Internal shared state was poisoned by a panicking thread.
    #[error("internal state unavailable: {0}")]
    Poisoned(&'static str),
    /// Rule session failure.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Run log or result store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Worker pool failure.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl RuleError {
    /// Creates a domain failure from any displayable message.
    #[must_use]
    pub fn processor(message: impl Into<String>) -> Self {
        Self::Processor(message.into())
    }

    /// Returns true when the error represents cancellation rather than failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::Session(SessionError::Halted) => true,
            Self::InvestigatorFailure {
                source, ..
            }
            | Self::ProcessFailure {
                source, ..
            } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Returns the stable numeric error code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::NotRegistered {
                what: ProcessorKind::Arbiter,
                ..
            } => 1,
            Self::NotRegistered {
                what: ProcessorKind::Investigator,
                ..
            } => 2,
            Self::MissingOptions(_) => 3,
            Self::Deserialization(_) => 5,
            Self::Serialization(_) => 6,
            Self::ResultInstantiation {
                ..
            } => 7,
            Self::Session(_) => 17,
            Self::InvestigatorFailure {
                ..
            } => 22,
            Self::DuplicateContainer(_) => 24,
            Self::DependencyCycle(_) => 27,
            Self::Cancelled => 28,
            Self::Processor(_) | Self::Poisoned(_) | Self::Store(_) | Self::Pool(_) => 0,
            Self::ProcessFailure {
                ..
            } => 100,
        }
    }
}

impl From<SerializerError> for RuleError {
    fn from(error: SerializerError) -> Self {
        match error {
            SerializerError::Encode(message) => Self::Serialization(message),
            SerializerError::Decode(message) => Self::Deserialization(message),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
