// crates/rule-arbiter-core/src/runtime/mod.rs
// ============================================================================
// Module: Rule Arbiter Runtime
// Description: Run scheduling, fact gathering, sessions, and statistics.
// Purpose: Execute arbiter pipelines over pluggable rule containers.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The runtime turns a registered request into a run: [`RuleService`]
//! schedules it, [`RunContext`] carries its state, investigators gather
//! facts into a [`CompositeSession`] opened by the [`SessionFactory`], and
//! the [`Arbiter`] pipeline evaluates rules and commits the result.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod arbiter;
pub mod cancel;
pub mod context;
pub mod investigator;
pub mod pool;
pub mod registry;
pub mod service;
pub mod session;
pub mod stats;
pub mod store;
pub mod timing;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use arbiter::Arbiter;
pub use arbiter::RESULT_GLOBAL;
pub use arbiter::process_rules;
pub use cancel::ActiveSession;
pub use cancel::CancellationToken;
pub use context::Attribute;
pub use context::RunContext;
pub use investigator::FactAggregator;
pub use investigator::FactPipeline;
pub use investigator::FactSink;
pub use investigator::Investigator;
pub use investigator::InvestigatorBinding;
pub use investigator::validate_bindings;
pub use pool::FullQueuePolicy;
pub use pool::PoolError;
pub use pool::WorkerPool;
pub use pool::WorkerPoolConfig;
pub use registry::ArbiterRegistration;
pub use registry::ArbiterRegistry;
pub use service::RuleService;
pub use service::RuleServiceBuilder;
pub use service::RuleServiceConfig;
pub use service::RunHandle;
pub use service::RunReport;
pub use session::CompositeSession;
pub use session::SessionFactory;
pub use stats::FactStatistic;
pub use stats::RuleStats;
pub use stats::RuleStatsSnapshot;
pub use store::InMemoryResultStore;
pub use store::InMemoryRunLog;
pub use timing::TimingTracker;
