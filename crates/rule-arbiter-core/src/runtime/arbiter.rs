// crates/rule-arbiter-core/src/runtime/arbiter.rs
// ============================================================================
// Module: Rule Arbiter Pipeline
// Description: Per-request arbiter contract and the session pipeline it drives.
// Purpose: Sequence session open, fact gathering, evaluation, and close.
// Dependencies: crate::{core, interfaces, runtime}, tracing
// ============================================================================

//! ## Overview
//! An [`Arbiter`] owns the pipeline for one request type:
//!
//! `before_session -> { open session -> before_facts -> investigate ->
//! before_rules -> evaluate -> after_rules -> close } -> after_session`
//!
//! [`process_rules`] works on a private copy of the committed result and
//! swaps it into the run context only after every phase succeeded. During
//! the session phase the working copy is exposed to rules as the
//! [`RESULT_GLOBAL`] global, a `Mutex<R::Result>`.
//!
//! Cancellation during evaluation halts the session; `after_rules` and
//! `after_session` still run before the run reports [`RuleError::Cancelled`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::error::RuleError;
use crate::core::identifiers::SessionId;
use crate::core::request::RuleRequest;
use crate::core::request::RuleResult;
use crate::interfaces::RuleSession;
use crate::interfaces::SessionError;
use crate::runtime::context::RunContext;
use crate::runtime::stats::short_type_name;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Global name under which the working result is exposed to rules.
pub const RESULT_GLOBAL: &str = "result";

// ============================================================================
// SECTION: Arbiter Contract
// ============================================================================

/// Orchestrates one run for request type `R`.
///
/// Every hook defaults to a no-op. Hooks returning an error abort the run,
/// which is then recorded as a failure.
pub trait Arbiter<R: RuleRequest>: Send + 'static {
    /// Name used for statistics and logs.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    /// Session ids this arbiter always runs, in addition to those bound to
    /// the request kind.
    fn rule_sets(&self) -> Vec<SessionId> {
        Vec::new()
    }

    /// Builds a fresh result when the run has none committed yet.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when the result cannot be constructed.
    fn new_result(&self, _ctx: &RunContext<R>) -> Result<R::Result, RuleError> {
        Ok(R::Result::default())
    }

    /// Runs before the session is opened.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] to abort the run.
    fn before_session(
        &mut self,
        _ctx: &RunContext<R>,
        _result: &mut R::Result,
    ) -> Result<(), RuleError> {
        Ok(())
    }

    /// Runs after the session is opened, before gathering.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] to abort the run.
    fn before_facts(
        &mut self,
        _ctx: &RunContext<R>,
        _session: &dyn RuleSession,
        _result: &mut R::Result,
    ) -> Result<(), RuleError> {
        Ok(())
    }

    /// Runs after gathering, before evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] to abort the run.
    fn before_rules(
        &mut self,
        _ctx: &RunContext<R>,
        _session: &dyn RuleSession,
        _result: &mut R::Result,
    ) -> Result<(), RuleError> {
        Ok(())
    }

    /// Runs after evaluation, before the session is closed.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] to abort the run.
    fn after_rules(
        &mut self,
        _ctx: &RunContext<R>,
        _session: &dyn RuleSession,
        _result: &mut R::Result,
    ) -> Result<(), RuleError> {
        Ok(())
    }

    /// Runs after the session is closed.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] to abort the run.
    fn after_session(
        &mut self,
        _ctx: &RunContext<R>,
        _result: &mut R::Result,
    ) -> Result<(), RuleError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Runs the arbiter pipeline and commits the result on success.
///
/// # Errors
///
/// Returns [`RuleError::Cancelled`] unchanged when the run was cancelled and
/// [`RuleError::ProcessFailure`] wrapping any other failure.
pub fn process_rules<R: RuleRequest>(
    arbiter: &mut dyn Arbiter<R>,
    ctx: &Arc<RunContext<R>>,
) -> Result<Arc<R::Result>, RuleError> {
    let name = arbiter.name().to_string();
    info!(
        run_id = %ctx.run_id(),
        request = %ctx.request().describe(),
        arbiter = %name,
        "processing request"
    );
    match run_pipeline(arbiter, ctx, &name) {
        Ok(result) => {
            ctx.commit_result(result)?;
            let committed = ctx.result().ok_or(RuleError::Poisoned("result slot"))?;
            info!(run_id = %ctx.run_id(), result = %committed.describe(), "request processed");
            Ok(committed)
        }
        Err(err) if err.is_cancellation() => {
            debug!(run_id = %ctx.run_id(), "request processing cancelled");
            Err(RuleError::Cancelled)
        }
        Err(err) => {
            let request = ctx.request().describe();
            warn!(
                run_id = %ctx.run_id(),
                request = %request,
                error = %err,
                "failed to process request"
            );
            Err(RuleError::ProcessFailure {
                request,
                source: Box::new(err),
            })
        }
    }
}

/// Runs every phase on a private copy of the result.
fn run_pipeline<R: RuleRequest>(
    arbiter: &mut dyn Arbiter<R>,
    ctx: &Arc<RunContext<R>>,
    name: &str,
) -> Result<R::Result, RuleError> {
    let mut result = match ctx.result() {
        Some(committed) => (*committed).clone(),
        None => arbiter.new_result(ctx).map_err(|err| match err {
            RuleError::ResultInstantiation {
                ..
            } => err,
            other => RuleError::ResultInstantiation {
                kind: <R::Result as RuleResult>::KIND,
                message: other.to_string(),
            },
        })?,
    };
    ctx.token().check()?;
    arbiter.before_session(ctx, &mut result)?;
    let mut result = run_session(arbiter, ctx, result, name)?;
    arbiter.after_session(ctx, &mut result)?;
    ctx.token().check()?;
    Ok(result)
}

/// Opens the composite session, runs the session phases, and closes it.
fn run_session<R: RuleRequest>(
    arbiter: &mut dyn Arbiter<R>,
    ctx: &Arc<RunContext<R>>,
    result: R::Result,
    name: &str,
) -> Result<R::Result, RuleError> {
    let session: Arc<dyn RuleSession> = Arc::new(ctx.new_session(&arbiter.rule_sets())?);
    let outcome = evaluate(arbiter, ctx, &session, result, name);
    if let Err(err) = session.close() {
        warn!(run_id = %ctx.run_id(), error = %err, "failed to close rule session");
    }
    outcome
}

/// Runs the phases that need an open session.
fn evaluate<R: RuleRequest>(
    arbiter: &mut dyn Arbiter<R>,
    ctx: &Arc<RunContext<R>>,
    session: &Arc<dyn RuleSession>,
    result: R::Result,
    name: &str,
) -> Result<R::Result, RuleError> {
    let working = Arc::new(Mutex::new(result));
    session.set_global(RESULT_GLOBAL, Arc::clone(&working) as _)?;

    with_working(&working, |result| arbiter.before_facts(ctx, session.as_ref(), result))?;
    ctx.investigate(Arc::clone(session))?;
    for statistic in ctx.stats()?.fact_statistics() {
        info!(
            run_id = %ctx.run_id(),
            fact_type = %statistic.fact_type,
            count = statistic.count,
            duration_ms = statistic.duration_ms,
            "gathered facts"
        );
    }
    with_working(&working, |result| arbiter.before_rules(ctx, session.as_ref(), result))?;

    if session.rule_count() == 0 {
        debug!(run_id = %ctx.run_id(), "no rules to evaluate");
    } else {
        ctx.token().check()?;
        ctx.start_rules(name)?;
        let fired = {
            let _active = ctx.token().activate(Arc::clone(session))?;
            session.run_rules()
        };
        let fired = match fired {
            Ok(fired) => fired,
            Err(SessionError::Halted) => 0,
            Err(err) => {
                ctx.finish_rules(name, 0)?;
                return Err(err.into());
            }
        };
        ctx.finish_rules(name, fired)?;
        ctx.merge_histogram(&session.rule_histogram())?;
        debug!(run_id = %ctx.run_id(), fired, "rules evaluated");
    }

    with_working(&working, |result| arbiter.after_rules(ctx, session.as_ref(), result))?;
    let mut guard = working.lock().map_err(|_| RuleError::Poisoned("working result"))?;
    Ok(std::mem::take(&mut *guard))
}

/// Runs a hook against the working result.
fn with_working<T>(
    working: &Mutex<T>,
    hook: impl FnOnce(&mut T) -> Result<(), RuleError>,
) -> Result<(), RuleError> {
    let mut guard = working.lock().map_err(|_| RuleError::Poisoned("working result"))?;
    hook(&mut guard)
}
