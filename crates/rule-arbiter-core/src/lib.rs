// crates/rule-arbiter-core/src/lib.rs
// ============================================================================
// Module: Rule Arbiter Core
// Description: Business-rule run orchestration over pluggable rule engines.
// Purpose: Schedule, gather, evaluate, and record rule runs per request type.
// Dependencies: serde, serde_jcs, serde_json, sha2, thiserror, time, tracing
// ============================================================================

//! ## Overview
//! A caller submits a typed request. The registered arbiter for that request
//! type opens a composite rule session, its investigators gather facts into
//! it (in parallel where dependencies allow), the session evaluates, and the
//! arbiter commits a typed result. Every run is recorded in a run log and
//! its result kept in a result store so equal requests can be found again.
//! Invariants:
//! - A result is committed only when every pipeline phase succeeded.
//! - An investigator starts only after all of its dependencies completed.
//! - Each run reaches exactly one terminal state.
//!
//! Rule engines plug in through [`interfaces::RuleContainer`] and
//! [`interfaces::RuleSession`]; storage through [`interfaces::RunLog`] and
//! [`interfaces::ResultStore`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;
pub use crate::interfaces::Fact;
pub use crate::interfaces::Global;
pub use crate::interfaces::ResultStore;
pub use crate::interfaces::RuleContainer;
pub use crate::interfaces::RuleSession;
pub use crate::interfaces::RuleSessionExt;
pub use crate::interfaces::RunLog;
pub use crate::interfaces::SessionError;
pub use crate::interfaces::StoreError;
pub use crate::interfaces::fact;
pub use crate::runtime::Arbiter;
pub use crate::runtime::ArbiterRegistration;
pub use crate::runtime::ArbiterRegistry;
pub use crate::runtime::Investigator;
pub use crate::runtime::InvestigatorBinding;
pub use crate::runtime::RuleService;
pub use crate::runtime::RunContext;
pub use crate::runtime::SessionFactory;
