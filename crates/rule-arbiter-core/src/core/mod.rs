// crates/rule-arbiter-core/src/core/mod.rs
// ============================================================================
// Module: Rule Arbiter Core Types
// Description: Identifiers, request contracts, run log records, and errors.
// Purpose: Provide stable, serializable types shared by the runtime and stores.
// Dependencies: serde, serde_jcs, sha2, thiserror, time
// ============================================================================

//! ## Overview
//! Core types describe what a run is (request, result, run id), how it is
//! recorded (run log entries and states), and how it can fail. Store backends
//! depend on these types only, never on the runtime.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod error;
pub mod hashing;
pub mod identifiers;
pub mod request;
pub mod rule_info;
pub mod run_log;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::ProcessorKind;
pub use error::RuleError;
pub use hashing::HashError;
pub use hashing::RequestHash;
pub use identifiers::ContainerId;
pub use identifiers::InvestigatorId;
pub use identifiers::RequestKind;
pub use identifiers::RunId;
pub use identifiers::SessionId;
pub use request::RuleRequest;
pub use request::RuleResult;
pub use rule_info::RuleInfo;
pub use rule_info::RuleInfoKind;
pub use run_log::NewRunLogEntry;
pub use run_log::RunLogEntry;
pub use run_log::RunState;
pub use time::Timestamp;
