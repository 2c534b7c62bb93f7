// crates/rule-arbiter-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Mock rule sessions, containers, and a threshold request family.
// Purpose: Provide reusable fixtures for rule-arbiter-core integration tests.
// Dependencies: rule-arbiter-core, serde
// ============================================================================

//! ## Overview
//! [`MockSession`] keeps facts and globals in memory and evaluates through an
//! optional closure. [`MockContainer`] hands out mock sessions by id. The
//! threshold fixtures flag an account whose gathered amounts exceed the
//! request threshold.

#![allow(
    dead_code,
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

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use rule_arbiter_core::Arbiter;
use rule_arbiter_core::ArbiterRegistration;
use rule_arbiter_core::ArbiterRegistry;
use rule_arbiter_core::ContainerId;
use rule_arbiter_core::Fact;
use rule_arbiter_core::Global;
use rule_arbiter_core::Investigator;
use rule_arbiter_core::InvestigatorBinding;
use rule_arbiter_core::RuleContainer;
use rule_arbiter_core::RuleError;
use rule_arbiter_core::RuleInfo;
use rule_arbiter_core::RuleInfoKind;
use rule_arbiter_core::RuleRequest;
use rule_arbiter_core::RuleResult;
use rule_arbiter_core::RuleSession;
use rule_arbiter_core::RuleSessionExt;
use rule_arbiter_core::RunContext;
use rule_arbiter_core::SessionError;
use rule_arbiter_core::SessionId;
use rule_arbiter_core::fact;
use rule_arbiter_core::runtime::FactSink;
use rule_arbiter_core::runtime::RESULT_GLOBAL;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Mock Session
// ============================================================================

/// Evaluation callback run by [`MockSession::run_rules`].
pub type Evaluator = Arc<dyn Fn(&MockSession) -> Result<u64, SessionError> + Send + Sync>;

/// In-memory rule session.
pub struct MockSession {
    facts: Mutex<Vec<Fact>>,
    globals: Mutex<BTreeMap<String, Global>>,
    histogram: Mutex<BTreeMap<String, u64>>,
    rules: usize,
    evaluator: Option<Evaluator>,
    halted: AtomicBool,
    closed: Arc<AtomicUsize>,
}

impl MockSession {
    /// Creates a session reporting `rules` rules and firing none.
    pub fn new(rules: usize) -> Self {
        Self::build(rules, None, Arc::new(AtomicUsize::new(0)))
    }

    /// Creates a session evaluating through `evaluator`.
    pub fn with_evaluator(rules: usize, evaluator: Evaluator) -> Self {
        Self::build(rules, Some(evaluator), Arc::new(AtomicUsize::new(0)))
    }

    fn build(rules: usize, evaluator: Option<Evaluator>, closed: Arc<AtomicUsize>) -> Self {
        Self {
            facts: Mutex::new(Vec::new()),
            globals: Mutex::new(BTreeMap::new()),
            histogram: Mutex::new(BTreeMap::new()),
            rules,
            evaluator,
            halted: AtomicBool::new(false),
            closed,
        }
    }

    /// Returns true once the session was halted.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

impl RuleSession for MockSession {
    fn insert(&self, fact: Fact) -> Result<(), SessionError> {
        self.facts.lock().unwrap().push(fact);
        Ok(())
    }

    fn facts(&self) -> Vec<Fact> {
        self.facts.lock().unwrap().clone()
    }

    fn set_global(&self, name: &str, value: Global) -> Result<(), SessionError> {
        self.globals.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    fn global(&self, name: &str) -> Option<Global> {
        self.globals.lock().unwrap().get(name).cloned()
    }

    fn run_rules(&self) -> Result<u64, SessionError> {
        let Some(evaluator) = &self.evaluator else {
            return Ok(0);
        };
        let fired = evaluator(self)?;
        *self.histogram.lock().unwrap().entry("mock-rule".to_string()).or_default() += fired;
        Ok(fired)
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn rule_count(&self) -> usize {
        self.rules
    }

    fn rule_histogram(&self) -> BTreeMap<String, u64> {
        self.histogram.lock().unwrap().clone()
    }

    fn close(&self) -> Result<(), SessionError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// SECTION: Mock Container
// ============================================================================

/// Recipe for sessions handed out by [`MockContainer`].
#[derive(Clone)]
pub struct SessionSpec {
    pub rules: usize,
    pub evaluator: Option<Evaluator>,
}

/// Container serving mock sessions by id.
pub struct MockContainer {
    id: ContainerId,
    sessions: Mutex<BTreeMap<SessionId, SessionSpec>>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
}

impl MockContainer {
    /// Creates an empty container.
    pub fn new(id: &str) -> Self {
        Self {
            id: ContainerId::new(id),
            sessions: Mutex::new(BTreeMap::new()),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Adds a session with `rules` rules that fire nothing.
    pub fn with_session(self, id: &str, rules: usize) -> Self {
        self.provide(id, SessionSpec {
            rules,
            evaluator: None,
        });
        self
    }

    /// Adds a session evaluating through `evaluator`.
    pub fn with_evaluator(self, id: &str, rules: usize, evaluator: Evaluator) -> Self {
        self.provide(id, SessionSpec {
            rules,
            evaluator: Some(evaluator),
        });
        self
    }

    /// Starts providing a session.
    pub fn provide(&self, id: &str, spec: SessionSpec) {
        self.sessions.lock().unwrap().insert(SessionId::new(id), spec);
    }

    /// Stops providing a session.
    pub fn withdraw(&self, id: &str) {
        self.sessions.lock().unwrap().remove(&SessionId::new(id));
    }
}

impl RuleContainer for MockContainer {
    fn id(&self) -> ContainerId {
        self.id.clone()
    }

    fn provided_sessions(&self) -> BTreeSet<SessionId> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }

    fn new_session(&self, session: &SessionId) -> Result<Box<dyn RuleSession>, SessionError> {
        let spec = self
            .sessions
            .lock()
            .unwrap()
            .get(session)
            .cloned()
            .ok_or_else(|| SessionError::NotProvided(session.clone()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession::build(spec.rules, spec.evaluator, Arc::clone(&self.closed))))
    }

    fn rule_info(&self) -> Vec<RuleInfo> {
        self.sessions
            .lock()
            .unwrap()
            .keys()
            .map(|session| {
                RuleInfo::new(self.id.as_str(), format!("{session}-rule"), RuleInfoKind::Rule, session.clone())
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Threshold Fixtures
// ============================================================================

/// Session evaluating threshold rules.
pub const THRESHOLD_SESSION: &str = "threshold-rules";

/// Flags an account whose amounts exceed `threshold`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdRequest {
    pub account: String,
    pub threshold: u64,
}

impl ThresholdRequest {
    pub fn new(account: &str, threshold: u64) -> Self {
        Self {
            account: account.to_string(),
            threshold,
        }
    }
}

impl RuleRequest for ThresholdRequest {
    const KIND: &'static str = "threshold";
    type Result = ThresholdResult;

    fn describe(&self) -> String {
        format!("threshold({}, {})", self.account, self.threshold)
    }
}

/// Threshold verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub total: u64,
    pub flagged: bool,
    pub notes: Vec<String>,
}

impl RuleResult for ThresholdResult {
    const KIND: &'static str = "threshold-result";
}

/// Amount fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amount(pub u64);

/// Note fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note(pub String);

/// Gathers fixed amounts.
pub struct AmountInvestigator {
    pub amounts: Vec<u64>,
}

impl Investigator<ThresholdRequest> for AmountInvestigator {
    type Fact = Amount;

    fn gather(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        sink: &mut FactSink<'_, Amount>,
    ) -> Result<(), RuleError> {
        sink.extend(self.amounts.iter().copied().map(Amount))?;
        Ok(())
    }
}

/// Gathers a note naming the account.
pub struct NoteInvestigator;

impl Investigator<ThresholdRequest> for NoteInvestigator {
    type Fact = Note;

    fn gather(
        &mut self,
        ctx: &RunContext<ThresholdRequest>,
        sink: &mut FactSink<'_, Note>,
    ) -> Result<(), RuleError> {
        sink.insert(Note(format!("account {}", ctx.request().account)))?;
        Ok(())
    }
}

/// Spins until the run is stopped, giving up after five seconds.
pub struct PollingInvestigator {
    pub started: Arc<AtomicUsize>,
}

impl Investigator<ThresholdRequest> for PollingInvestigator {
    type Fact = Amount;

    fn gather(
        &mut self,
        ctx: &RunContext<ThresholdRequest>,
        _sink: &mut FactSink<'_, Amount>,
    ) -> Result<(), RuleError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ctx.is_stopped() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        ctx.token().check()
    }
}

/// Counts how often it gathers.
pub struct CountingInvestigator {
    pub calls: Arc<AtomicUsize>,
}

impl Investigator<ThresholdRequest> for CountingInvestigator {
    type Fact = Note;

    fn gather(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        sink: &mut FactSink<'_, Note>,
    ) -> Result<(), RuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sink.insert(Note("late".to_string()))?;
        Ok(())
    }
}

/// Two polling investigators plus a counting one that depends on both.
pub fn polling_bindings(
    started: &Arc<AtomicUsize>,
    dependent_calls: &Arc<AtomicUsize>,
) -> Vec<InvestigatorBinding<ThresholdRequest>> {
    let left = Arc::clone(started);
    let right = Arc::clone(started);
    let calls = Arc::clone(dependent_calls);
    vec![
        InvestigatorBinding::new("left", move || PollingInvestigator {
            started: Arc::clone(&left),
        }),
        InvestigatorBinding::new("right", move || PollingInvestigator {
            started: Arc::clone(&right),
        }),
        InvestigatorBinding::new("after", move || CountingInvestigator {
            calls: Arc::clone(&calls),
        })
        .depends_on("left")
        .depends_on("right"),
    ]
}

/// Blocks until `counter` reaches `target`, failing after five seconds.
pub fn wait_for_count(counter: &AtomicUsize, target: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.load(Ordering::SeqCst) < target {
        assert!(Instant::now() < deadline, "counter stuck below {target}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Inserts the request as a fact and copies notes into the result.
#[derive(Default)]
pub struct ThresholdArbiter;

impl Arbiter<ThresholdRequest> for ThresholdArbiter {
    fn rule_sets(&self) -> Vec<SessionId> {
        vec![SessionId::new(THRESHOLD_SESSION)]
    }

    fn before_rules(
        &mut self,
        ctx: &RunContext<ThresholdRequest>,
        session: &dyn RuleSession,
        _result: &mut ThresholdResult,
    ) -> Result<(), RuleError> {
        session.insert(fact(ctx.request().clone()))?;
        Ok(())
    }

    fn after_rules(
        &mut self,
        _ctx: &RunContext<ThresholdRequest>,
        session: &dyn RuleSession,
        result: &mut ThresholdResult,
    ) -> Result<(), RuleError> {
        result.notes = session.facts_of::<Note>().iter().map(|note| note.0.clone()).collect();
        Ok(())
    }
}

/// Evaluator summing amounts against the request threshold.
pub fn threshold_evaluator() -> Evaluator {
    Arc::new(|session: &MockSession| {
        let total: u64 = session.facts_of::<Amount>().iter().map(|amount| amount.0).sum();
        let threshold = session
            .facts_of::<ThresholdRequest>()
            .first()
            .map_or(u64::MAX, |request| request.threshold);
        let working = session
            .global_as::<Mutex<ThresholdResult>>(RESULT_GLOBAL)
            .ok_or_else(|| SessionError::Evaluation("result global missing".to_string()))?;
        let mut result = working.lock().unwrap();
        result.total = total;
        result.flagged = total > threshold;
        Ok(1)
    })
}

/// Container providing the threshold session.
pub fn threshold_container() -> Arc<MockContainer> {
    Arc::new(MockContainer::new("threshold-container").with_evaluator(
        THRESHOLD_SESSION,
        1,
        threshold_evaluator(),
    ))
}

/// Registry with the threshold arbiter and both investigators.
pub fn threshold_registry(amounts: Vec<u64>) -> ArbiterRegistry {
    let mut registry = ArbiterRegistry::new();
    let registration = ArbiterRegistration::new(|| ThresholdArbiter)
        .investigator(InvestigatorBinding::new("amounts", move || AmountInvestigator {
            amounts: amounts.clone(),
        }))
        .investigator(InvestigatorBinding::new("notes", || NoteInvestigator).depends_on("amounts"));
    assert!(registry.register(registration).unwrap());
    registry
}
