// crates/rule-arbiter-core/tests/pipeline.rs
// ============================================================================
// Module: Arbiter Pipeline Tests
// Description: Tests for session phases, result commit, and fact pipelines.
// ============================================================================
//! ## Overview
//! Runs the arbiter pipeline against mock containers and checks that results
//! are committed only on success, cancellation halts evaluation, and fact
//! pipelines filter, mutate, and aggregate before insertion.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::Amount;
use common::AmountInvestigator;
use common::Evaluator;
use common::MockContainer;
use common::MockSession;
use common::NoteInvestigator;
use common::THRESHOLD_SESSION;
use common::ThresholdArbiter;
use common::ThresholdRequest;
use common::ThresholdResult;
use common::threshold_container;
use rule_arbiter_core::Arbiter;
use rule_arbiter_core::Fact;
use rule_arbiter_core::Investigator;
use rule_arbiter_core::InvestigatorBinding;
use rule_arbiter_core::RuleError;
use rule_arbiter_core::RuleSession;
use rule_arbiter_core::RuleSessionExt;
use rule_arbiter_core::RunContext;
use rule_arbiter_core::RunId;
use rule_arbiter_core::SessionError;
use rule_arbiter_core::SessionFactory;
use rule_arbiter_core::SessionId;
use rule_arbiter_core::fact;
use rule_arbiter_core::runtime::FactAggregator;
use rule_arbiter_core::runtime::FactPipeline;
use rule_arbiter_core::runtime::FactSink;
use rule_arbiter_core::runtime::process_rules;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

fn threshold_context(
    request: ThresholdRequest,
    amounts: Vec<u64>,
    container: Arc<MockContainer>,
) -> Arc<RunContext<ThresholdRequest>> {
    let factory = Arc::new(SessionFactory::new());
    factory.register_container(container).unwrap();
    Arc::new(RunContext::new(RunId::new(1), request, factory).with_investigators(vec![
        InvestigatorBinding::new("amounts", move || AmountInvestigator {
            amounts: amounts.clone(),
        }),
        InvestigatorBinding::new("notes", || NoteInvestigator).depends_on("amounts"),
    ]))
}

/// Mutates the working result, then fails in a chosen phase.
struct FaultyArbiter {
    fail_after_rules: bool,
}

impl Arbiter<ThresholdRequest> for FaultyArbiter {
    fn rule_sets(&self) -> Vec<SessionId> {
        vec![SessionId::new(THRESHOLD_SESSION)]
    }

    fn before_session(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        result: &mut ThresholdResult,
    ) -> Result<(), RuleError> {
        result.notes.push("touched".to_string());
        Ok(())
    }

    fn after_rules(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        _session: &dyn RuleSession,
        result: &mut ThresholdResult,
    ) -> Result<(), RuleError> {
        result.total = 999;
        if self.fail_after_rules {
            return Err(RuleError::processor("after_rules rejected the verdict"));
        }
        Ok(())
    }
}

/// Counts hook invocations.
struct CountingArbiter {
    after_rules: Arc<AtomicUsize>,
    after_session: Arc<AtomicUsize>,
}

impl Arbiter<ThresholdRequest> for CountingArbiter {
    fn rule_sets(&self) -> Vec<SessionId> {
        vec![SessionId::new(THRESHOLD_SESSION)]
    }

    fn after_rules(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        _session: &dyn RuleSession,
        _result: &mut ThresholdResult,
    ) -> Result<(), RuleError> {
        self.after_rules.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn after_session(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        _result: &mut ThresholdResult,
    ) -> Result<(), RuleError> {
        self.after_session.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn blocking_evaluator(started: Arc<AtomicBool>) -> Evaluator {
    Arc::new(move |session: &MockSession| {
        started.store(true, Ordering::SeqCst);
        while !session.is_halted() {
            thread::sleep(Duration::from_millis(1));
        }
        Err(SessionError::Halted)
    })
}

/// Counts observed amounts and emits the count as a fact.
#[derive(Default)]
struct AmountCounter {
    seen: u64,
}

/// Aggregated count fact.
#[derive(Debug, PartialEq, Eq)]
struct AmountCount(u64);

impl FactAggregator<Amount> for AmountCounter {
    fn fact_type(&self) -> &str {
        "AmountCount"
    }

    fn observe(&mut self, _fact: &Amount) {
        self.seen += 1;
    }

    fn finish(&mut self) -> Vec<Fact> {
        vec![fact(AmountCount(self.seen))]
    }
}

/// Gathers amounts through a filtering, doubling, counting pipeline.
struct PipelinedAmounts;

impl Investigator<ThresholdRequest> for PipelinedAmounts {
    type Fact = Amount;

    fn pipeline(&self) -> FactPipeline<Amount> {
        FactPipeline::new()
            .filter(|amount: &Amount| amount.0 > 1)
            .mutate(|amount: &mut Amount| amount.0 *= 2)
            .aggregate(AmountCounter::default())
    }

    fn gather(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        sink: &mut FactSink<'_, Amount>,
    ) -> Result<(), RuleError> {
        let kept = sink.extend([1, 5, 10, 20].map(Amount))?;
        assert_eq!(kept, 3);
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn threshold_request_is_flagged_end_to_end() {
    let ctx = threshold_context(ThresholdRequest::new("acme", 5), vec![2, 4], threshold_container());

    let result = process_rules(&mut ThresholdArbiter, &ctx).unwrap();

    assert_eq!(result.total, 6);
    assert!(result.flagged);
    assert_eq!(result.notes, vec!["account acme".to_string()]);
    assert_eq!(ctx.result().as_deref(), Some(&*result));
    let stats = ctx.stats().unwrap();
    assert_eq!(stats.fact_count("Amount"), 2);
    assert_eq!(stats.fact_count("Note"), 1);
    assert_eq!(stats.rule_count("ThresholdArbiter"), 1);
    assert_eq!(stats.rule_histogram().get("mock-rule"), Some(&1));
    let snapshot = stats.snapshot();
    assert!(snapshot.facts_active_ms <= snapshot.facts_span_ms);
    assert!(stats.facts().span() >= stats.facts().active());
}

#[test]
fn threshold_below_limit_is_not_flagged() {
    let ctx = threshold_context(ThresholdRequest::new("small", 50), vec![2, 4], threshold_container());

    let result = process_rules(&mut ThresholdArbiter, &ctx).unwrap();

    assert_eq!(result.total, 6);
    assert!(!result.flagged);
}

#[test]
fn failed_run_leaves_committed_result_untouched() {
    let container = threshold_container();
    let factory = Arc::new(SessionFactory::new());
    factory.register_container(container).unwrap();
    let prior = ThresholdResult {
        total: 1,
        flagged: false,
        notes: vec!["prior".to_string()],
    };
    let ctx = Arc::new(
        RunContext::new(RunId::new(3), ThresholdRequest::new("acme", 5), factory)
            .with_result(prior.clone()),
    );

    let err = process_rules(
        &mut FaultyArbiter {
            fail_after_rules: true,
        },
        &ctx,
    )
    .unwrap_err();

    assert!(matches!(err, RuleError::ProcessFailure { .. }));
    assert_eq!(err.code(), 100);
    assert_eq!(ctx.result().as_deref(), Some(&prior));
}

#[test]
fn successful_run_starts_from_committed_result() {
    let factory = Arc::new(SessionFactory::new());
    factory.register_container(threshold_container()).unwrap();
    let ctx = Arc::new(
        RunContext::new(RunId::new(4), ThresholdRequest::new("acme", 5), factory).with_result(
            ThresholdResult {
                notes: vec!["prior".to_string()],
                ..ThresholdResult::default()
            },
        ),
    );

    let result = process_rules(
        &mut FaultyArbiter {
            fail_after_rules: false,
        },
        &ctx,
    )
    .unwrap();

    assert_eq!(result.notes, vec!["prior".to_string(), "touched".to_string()]);
    assert_eq!(result.total, 999);
}

#[test]
fn cancellation_halts_evaluation_and_skips_commit() {
    let started = Arc::new(AtomicBool::new(false));
    let container = Arc::new(MockContainer::new("blocking").with_evaluator(
        THRESHOLD_SESSION,
        1,
        blocking_evaluator(Arc::clone(&started)),
    ));
    let ctx = threshold_context(ThresholdRequest::new("acme", 5), vec![1], container.clone());
    let after_rules = Arc::new(AtomicUsize::new(0));
    let after_session = Arc::new(AtomicUsize::new(0));
    let mut arbiter = CountingArbiter {
        after_rules: Arc::clone(&after_rules),
        after_session: Arc::clone(&after_session),
    };

    let canceller = {
        let token = ctx.token().clone();
        let started = Arc::clone(&started);
        thread::spawn(move || {
            while !started.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            assert!(token.cancel());
            assert!(!token.cancel());
        })
    };
    let err = process_rules(&mut arbiter, &ctx).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, RuleError::Cancelled));
    assert_eq!(after_rules.load(Ordering::SeqCst), 1);
    assert_eq!(after_session.load(Ordering::SeqCst), 1);
    assert!(ctx.result().is_none());
    assert_eq!(container.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn result_is_visible_to_rules_as_global() {
    let seen = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&seen);
    let evaluator: Evaluator = Arc::new(move |session: &MockSession| {
        let working = session
            .global_as::<std::sync::Mutex<ThresholdResult>>(rule_arbiter_core::runtime::RESULT_GLOBAL);
        observed.store(working.is_some(), Ordering::SeqCst);
        Ok(0)
    });
    let container =
        Arc::new(MockContainer::new("observer").with_evaluator(THRESHOLD_SESSION, 1, evaluator));
    let ctx = threshold_context(ThresholdRequest::new("acme", 5), vec![], container);

    process_rules(&mut ThresholdArbiter, &ctx).unwrap();

    assert!(seen.load(Ordering::SeqCst));
}

#[test]
fn fact_pipeline_filters_mutates_and_aggregates() {
    let factory = Arc::new(SessionFactory::new());
    let ctx = Arc::new(
        RunContext::new(RunId::new(5), ThresholdRequest::new("acme", 5), factory)
            .with_investigators(vec![InvestigatorBinding::new("piped", || PipelinedAmounts)]),
    );
    let session = Arc::new(MockSession::new(0));

    ctx.investigate(Arc::clone(&session) as Arc<dyn RuleSession>).unwrap();

    let amounts: Vec<u64> = session.facts_of::<Amount>().iter().map(|amount| amount.0).collect();
    assert_eq!(amounts, vec![10, 20, 40]);
    let counts = session.facts_of::<AmountCount>();
    assert_eq!(counts.len(), 1);
    assert_eq!(*counts[0], AmountCount(3));
    let stats = ctx.stats().unwrap();
    assert_eq!(stats.fact_count("Amount"), 3);
    assert_eq!(stats.fact_count("AmountCount"), 1);
}

#[test]
fn attributes_are_shared_across_phases() {
    let ctx = RunContext::new(
        RunId::new(6),
        ThresholdRequest::new("acme", 5),
        Arc::new(SessionFactory::new()),
    );
    ctx.set_attribute("region", "emea".to_string()).unwrap();

    assert_eq!(ctx.attribute_as::<String>("region").unwrap().as_deref(), Some(&"emea".to_string()));
    assert!(ctx.attribute_as::<u32>("region").unwrap().is_none());
    assert!(ctx.remove_attribute("region").unwrap().is_some());
    assert!(ctx.attribute("region").unwrap().is_none());
}
