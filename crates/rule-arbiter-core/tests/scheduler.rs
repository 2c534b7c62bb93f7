// crates/rule-arbiter-core/tests/scheduler.rs
// ============================================================================
// Module: Investigator Scheduler Tests
// Description: Tests for dependency-aware fact gathering.
// ============================================================================
//! ## Overview
//! Validates that investigators start only after their dependencies finish,
//! run exactly once, fail fast, stop on cancellation, and reject cyclic
//! graphs.

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
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::Amount;
use common::MockSession;
use common::ThresholdRequest;
use common::polling_bindings;
use common::wait_for_count;
use rule_arbiter_core::ArbiterRegistration;
use rule_arbiter_core::ArbiterRegistry;
use rule_arbiter_core::Investigator;
use rule_arbiter_core::InvestigatorBinding;
use rule_arbiter_core::RuleError;
use rule_arbiter_core::RuleSession;
use rule_arbiter_core::RunContext;
use rule_arbiter_core::RunId;
use rule_arbiter_core::SessionFactory;
use rule_arbiter_core::runtime::FactSink;
use rule_arbiter_core::runtime::FullQueuePolicy;
use rule_arbiter_core::runtime::WorkerPool;
use rule_arbiter_core::runtime::WorkerPoolConfig;
use rule_arbiter_core::runtime::validate_bindings;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

struct Recorder {
    id: &'static str,
    log: EventLog,
    behavior: Behavior,
}

impl Investigator<ThresholdRequest> for Recorder {
    type Fact = Amount;

    fn gather(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        sink: &mut FactSink<'_, Amount>,
    ) -> Result<(), RuleError> {
        self.log.lock().unwrap().push(format!("start:{}", self.id));
        thread::sleep(Duration::from_millis(5));
        match self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail => return Err(RuleError::processor(format!("{} failed", self.id))),
            Behavior::Panic => panic!("{} exploded", self.id),
        }
        sink.insert(Amount(1))?;
        self.log.lock().unwrap().push(format!("end:{}", self.id));
        Ok(())
    }
}

fn recorder(
    id: &'static str,
    log: &EventLog,
    depends_on: &[&'static str],
    behavior: Behavior,
) -> InvestigatorBinding<ThresholdRequest> {
    let log = Arc::clone(log);
    depends_on.iter().fold(
        InvestigatorBinding::new(id, move || Recorder {
            id,
            log: Arc::clone(&log),
            behavior,
        }),
        |binding, dependency| binding.depends_on(*dependency),
    )
}

fn pool(size: usize) -> Arc<WorkerPool> {
    Arc::new(
        WorkerPool::new(&WorkerPoolConfig {
            name: "test-investigators".to_string(),
            size,
            queue_capacity: 16,
            policy: FullQueuePolicy::Block,
        })
        .unwrap(),
    )
}

fn context(
    bindings: Vec<InvestigatorBinding<ThresholdRequest>>,
    pool: Option<Arc<WorkerPool>>,
) -> Arc<RunContext<ThresholdRequest>> {
    let ctx = RunContext::new(
        RunId::new(1),
        ThresholdRequest::new("acme", 5),
        Arc::new(SessionFactory::new()),
    )
    .with_investigators(bindings);
    Arc::new(match pool {
        Some(pool) => ctx.with_pool(pool),
        None => ctx,
    })
}

fn position(events: &[String], event: &str) -> usize {
    events.iter().position(|entry| entry == event).unwrap_or_else(|| panic!("missing {event}"))
}

fn count(events: &[String], event: &str) -> usize {
    events.iter().filter(|entry| *entry == event).count()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn parallel_investigators_start_after_dependencies_finish() {
    let log = EventLog::default();
    let bindings = vec![
        recorder("d", &log, &["b", "c"], Behavior::Succeed),
        recorder("b", &log, &["a"], Behavior::Succeed),
        recorder("c", &log, &["a"], Behavior::Succeed),
        recorder("a", &log, &[], Behavior::Succeed),
        recorder("e", &log, &[], Behavior::Succeed),
    ];
    let ctx = context(bindings, Some(pool(4)));
    let session = Arc::new(MockSession::new(0));

    ctx.investigate(Arc::clone(&session) as Arc<dyn RuleSession>).unwrap();

    let events = log.lock().unwrap().clone();
    for id in ["a", "b", "c", "d", "e"] {
        assert_eq!(count(&events, &format!("start:{id}")), 1, "{id} started once");
        assert_eq!(count(&events, &format!("end:{id}")), 1, "{id} finished once");
    }
    assert!(position(&events, "end:a") < position(&events, "start:b"));
    assert!(position(&events, "end:a") < position(&events, "start:c"));
    assert!(position(&events, "end:b") < position(&events, "start:d"));
    assert!(position(&events, "end:c") < position(&events, "start:d"));
    assert_eq!(session.fact_count(), 5);
    assert_eq!(ctx.stats().unwrap().fact_count("Amount"), 5);
}

#[test]
fn sequential_investigators_follow_dependency_order() {
    let log = EventLog::default();
    let bindings = vec![
        recorder("late", &log, &["early"], Behavior::Succeed),
        recorder("early", &log, &[], Behavior::Succeed),
    ];
    let ctx = context(bindings, None);

    ctx.investigate(Arc::new(MockSession::new(0))).unwrap();

    let events = log.lock().unwrap().clone();
    assert_eq!(events, vec!["start:early", "end:early", "start:late", "end:late"]);
}

#[test]
fn failing_investigator_fails_fast() {
    let log = EventLog::default();
    let bindings = vec![
        recorder("a", &log, &[], Behavior::Succeed),
        recorder("b", &log, &["a"], Behavior::Fail),
        recorder("c", &log, &["b"], Behavior::Succeed),
    ];
    let ctx = context(bindings, Some(pool(2)));

    let err = ctx.investigate(Arc::new(MockSession::new(0))).unwrap_err();

    match err {
        RuleError::InvestigatorFailure {
            investigator, ..
        } => assert_eq!(investigator.as_str(), "b"),
        other => panic!("unexpected error: {other}"),
    }
    let events = log.lock().unwrap().clone();
    assert_eq!(count(&events, "start:c"), 0);
}

#[test]
fn panicking_investigator_becomes_failure() {
    let log = EventLog::default();
    let ctx = context(vec![recorder("boom", &log, &[], Behavior::Panic)], None);

    let err = ctx.investigate(Arc::new(MockSession::new(0))).unwrap_err();

    assert!(matches!(err, RuleError::InvestigatorFailure { .. }));
    assert!(err.to_string().contains("boom"));
}

#[test]
fn cyclic_dependencies_are_rejected_at_registration() {
    let log = EventLog::default();
    let bindings = vec![
        recorder("a", &log, &["c"], Behavior::Succeed),
        recorder("b", &log, &["a"], Behavior::Succeed),
        recorder("c", &log, &["b"], Behavior::Succeed),
    ];
    assert!(matches!(validate_bindings(&bindings), Err(RuleError::DependencyCycle(_))));

    let mut registry = ArbiterRegistry::new();
    let registration = bindings.into_iter().fold(
        ArbiterRegistration::new(|| common::ThresholdArbiter),
        ArbiterRegistration::investigator,
    );
    let err = registry.register(registration).unwrap_err();
    assert_eq!(err.code(), 27);
    assert!(registry.known_requests().is_empty());
}

#[test]
fn scheduler_reports_cycle_instead_of_hanging() {
    let log = EventLog::default();
    let bindings = vec![
        recorder("free", &log, &[], Behavior::Succeed),
        recorder("x", &log, &["y"], Behavior::Succeed),
        recorder("y", &log, &["x"], Behavior::Succeed),
    ];
    let ctx = context(bindings, Some(pool(2)));

    let err = ctx.investigate(Arc::new(MockSession::new(0))).unwrap_err();

    match err {
        RuleError::DependencyCycle(stuck) => assert_eq!(stuck, vec!["x", "y"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(count(&log.lock().unwrap(), "end:free"), 1);
}

#[test]
fn cancelled_run_skips_investigation() {
    let log = EventLog::default();
    let ctx = context(vec![recorder("a", &log, &[], Behavior::Succeed)], Some(pool(1)));
    assert!(ctx.token().cancel());

    let err = ctx.investigate(Arc::new(MockSession::new(0))).unwrap_err();

    assert!(err.is_cancellation());
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn cancel_during_parallel_investigation_stops_outstanding_work() {
    let started = Arc::new(AtomicUsize::new(0));
    let dependent_calls = Arc::new(AtomicUsize::new(0));
    let ctx = context(polling_bindings(&started, &dependent_calls), Some(pool(2)));

    let canceller = {
        let ctx = Arc::clone(&ctx);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            wait_for_count(&started, 2);
            thread::sleep(Duration::from_millis(30));
            ctx.stop();
        })
    };
    let err = ctx.investigate(Arc::new(MockSession::new(0))).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, RuleError::Cancelled), "unexpected error: {err}");
    assert!(err.is_cancellation());
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(dependent_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn dependencies_outside_the_set_are_ignored() {
    let log = EventLog::default();
    let ctx = context(vec![recorder("solo", &log, &["absent"], Behavior::Succeed)], None);

    ctx.investigate(Arc::new(MockSession::new(0))).unwrap();

    assert_eq!(count(&log.lock().unwrap(), "end:solo"), 1);
}
