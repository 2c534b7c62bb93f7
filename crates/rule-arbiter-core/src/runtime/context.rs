// crates/rule-arbiter-core/src/runtime/context.rs
// ============================================================================
// Module: Rule Arbiter Run Context
// Description: Per-run state and the dependency-aware investigator scheduler.
// Purpose: Own everything one run needs and gather its facts concurrently.
// Dependencies: crate::{core, interfaces, runtime}, tracing
// ============================================================================

//! ## Overview
//! A [`RunContext`] belongs to exactly one run. It holds the request, the
//! committed result slot, an attribute bag, run statistics, and the run's
//! cancellation token.
//!
//! [`RunContext::investigate`] runs every applicable investigator against one
//! session. In parallel mode each investigator whose in-set dependencies have
//! all finished is submitted to the investigator pool; the scheduler then
//! waits on a completion channel for any one task to finish and re-evaluates
//! eligibility. The waiting and running sets are owned by the scheduling
//! loop; tasks only report `(index, outcome)` over the channel.
//!
//! Security posture: investigator code is untrusted with respect to panics;
//! a panicking investigator is contained and reported as a failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;

use tracing::debug;

use crate::core::error::RuleError;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;
use crate::core::request::RuleRequest;
use crate::interfaces::RuleSession;
use crate::runtime::cancel::CancellationToken;
use crate::runtime::investigator::InvestigatorBinding;
use crate::runtime::investigator::dependency_indices;
use crate::runtime::investigator::dependency_order;
use crate::runtime::pool::WorkerPool;
use crate::runtime::session::CompositeSession;
use crate::runtime::session::SessionFactory;
use crate::runtime::stats::RuleStats;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Value stored in the attribute bag.
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// Outcome reported by one investigator task.
type Completion = (usize, Result<(), RuleError>);

// ============================================================================
// SECTION: Run Context
// ============================================================================

/// Mutable state of one run.
pub struct RunContext<R: RuleRequest> {
    /// Run identifier.
    run_id: RunId,
    /// Request being processed.
    request: Arc<R>,
    /// Committed result, replaced only on successful completion.
    result: RwLock<Option<Arc<R::Result>>>,
    /// Named values shared by investigators and the arbiter.
    attributes: Mutex<BTreeMap<String, Attribute>>,
    /// Run statistics.
    stats: Mutex<RuleStats>,
    /// Run cancellation token.
    token: CancellationToken,
    /// Investigators applicable to the request.
    investigators: Vec<InvestigatorBinding<R>>,
    /// Pool for parallel gathering.
    pool: Option<Arc<WorkerPool>>,
    /// Whether gathering may run in parallel.
    parallel: bool,
    /// Session registry.
    sessions: Arc<SessionFactory>,
}

impl<R: RuleRequest> fmt::Debug for RunContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("request", &self.request)
            .field("investigators", &self.investigators.len())
            .field("parallel", &self.parallel)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<R: RuleRequest> RunContext<R> {
    /// Creates a context with no investigators that gathers sequentially.
    #[must_use]
    pub fn new(run_id: RunId, request: R, sessions: Arc<SessionFactory>) -> Self {
        Self {
            run_id,
            request: Arc::new(request),
            result: RwLock::new(None),
            attributes: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(RuleStats::new()),
            token: CancellationToken::new(),
            investigators: Vec::new(),
            pool: None,
            parallel: false,
            sessions,
        }
    }

    /// Sets the applicable investigators.
    #[must_use]
    pub fn with_investigators(mut self, investigators: Vec<InvestigatorBinding<R>>) -> Self {
        self.investigators = investigators;
        self
    }

    /// Enables parallel gathering on `pool`.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self.parallel = true;
        self
    }

    /// Toggles parallel gathering; without a pool gathering is sequential.
    #[must_use]
    pub const fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Seeds the committed result.
    #[must_use]
    pub fn with_result(self, result: R::Result) -> Self {
        Self {
            result: RwLock::new(Some(Arc::new(result))),
            ..self
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the request.
    #[must_use]
    pub fn request(&self) -> &R {
        &self.request
    }

    /// Returns the committed result, if any.
    #[must_use]
    pub fn result(&self) -> Option<Arc<R::Result>> {
        self.result.read().ok().and_then(|slot| slot.clone())
    }

    /// Replaces the committed result.
    pub(crate) fn commit_result(&self, result: R::Result) -> Result<(), RuleError> {
        let mut slot = self.result.write().map_err(|_| RuleError::Poisoned("result slot"))?;
        *slot = Some(Arc::new(result));
        Ok(())
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns true once the run was asked to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Asks the run to stop.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Returns the applicable investigator bindings.
    #[must_use]
    pub fn investigators(&self) -> &[InvestigatorBinding<R>] {
        &self.investigators
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    /// Locks the attribute bag.
    fn lock_attributes(&self) -> Result<MutexGuard<'_, BTreeMap<String, Attribute>>, RuleError> {
        self.attributes.lock().map_err(|_| RuleError::Poisoned("run attributes"))
    }

    /// Stores a named attribute, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the attribute lock is poisoned.
    pub fn set_attribute<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        value: T,
    ) -> Result<Option<Attribute>, RuleError> {
        Ok(self.lock_attributes()?.insert(name.into(), Arc::new(value)))
    }

    /// Returns a named attribute.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the attribute lock is poisoned.
    pub fn attribute(&self, name: &str) -> Result<Option<Attribute>, RuleError> {
        Ok(self.lock_attributes()?.get(name).cloned())
    }

    /// Returns a named attribute when it holds a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the attribute lock is poisoned.
    pub fn attribute_as<T: Any + Send + Sync>(
        &self,
        name: &str,
    ) -> Result<Option<Arc<T>>, RuleError> {
        Ok(self.attribute(name)?.and_then(|value| value.downcast::<T>().ok()))
    }

    /// Removes a named attribute.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the attribute lock is poisoned.
    pub fn remove_attribute(&self, name: &str) -> Result<Option<Attribute>, RuleError> {
        Ok(self.lock_attributes()?.remove(name))
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    /// Runs `update` against the run statistics.
    fn with_stats<T>(&self, update: impl FnOnce(&mut RuleStats) -> T) -> Result<T, RuleError> {
        let mut stats = self.stats.lock().map_err(|_| RuleError::Poisoned("run statistics"))?;
        Ok(update(&mut stats))
    }

    /// Opens the gathering interval for `fact_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the statistics lock is poisoned.
    pub fn start_facts(&self, fact_type: &str) -> Result<(), RuleError> {
        self.with_stats(|stats| stats.start_facts(fact_type))
    }

    /// Closes the gathering interval for `fact_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the statistics lock is poisoned.
    pub fn finish_facts(&self, fact_type: &str) -> Result<(), RuleError> {
        self.with_stats(|stats| stats.finish_facts(fact_type))
    }

    /// Counts inserted facts of `fact_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the statistics lock is poisoned.
    pub fn add_facts(&self, fact_type: &str, inserted: u64) -> Result<(), RuleError> {
        self.with_stats(|stats| stats.add_facts(fact_type, inserted))
    }

    /// Opens the evaluation interval for `arbiter`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the statistics lock is poisoned.
    pub fn start_rules(&self, arbiter: &str) -> Result<(), RuleError> {
        self.with_stats(|stats| stats.start_rules(arbiter))
    }

    /// Closes the evaluation interval for `arbiter`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the statistics lock is poisoned.
    pub fn finish_rules(&self, arbiter: &str, fired: u64) -> Result<(), RuleError> {
        self.with_stats(|stats| stats.finish_rules(arbiter, fired))
    }

    /// Merges a session rule histogram.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the statistics lock is poisoned.
    pub fn merge_histogram(&self, histogram: &BTreeMap<String, u64>) -> Result<(), RuleError> {
        self.with_stats(|stats| stats.merge_histogram(histogram))
    }

    /// Returns a copy of the run statistics.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the statistics lock is poisoned.
    pub fn stats(&self) -> Result<RuleStats, RuleError> {
        self.with_stats(|stats| stats.clone())
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// Opens a composite session for this run's request kind.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the session registry is poisoned.
    pub fn new_session(&self, sessions: &[SessionId]) -> Result<CompositeSession, RuleError> {
        self.sessions.get_session(&R::kind(), sessions)
    }

    // ------------------------------------------------------------------------
    // Investigation
    // ------------------------------------------------------------------------

    /// Runs every applicable investigator against `session`.
    ///
    /// Returns once every investigator finished, one failed, or the run was
    /// cancelled. Tasks already running are allowed to finish before return.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Cancelled`] on cancellation,
    /// [`RuleError::InvestigatorFailure`] when an investigator fails, and
    /// [`RuleError::DependencyCycle`] when no remaining investigator can
    /// ever become eligible.
    pub fn investigate(self: &Arc<Self>, session: Arc<dyn RuleSession>) -> Result<(), RuleError> {
        if self.investigators.is_empty() {
            return Ok(());
        }
        self.token.check()?;
        match &self.pool {
            Some(pool) if self.parallel && self.investigators.len() > 1 => {
                self.investigate_parallel(pool, &session)
            }
            _ => self.investigate_sequential(session.as_ref()),
        }
    }

    /// Runs investigators one by one in dependency order on this thread.
    fn investigate_sequential(&self, session: &dyn RuleSession) -> Result<(), RuleError> {
        let abort = AtomicBool::new(false);
        for index in dependency_order(&self.investigators)? {
            self.token.check()?;
            let binding = &self.investigators[index];
            binding.run(self, session, &abort).map_err(|err| self.classify(index, err))?;
        }
        Ok(())
    }

    /// Runs investigators on the pool as their dependencies complete.
    fn investigate_parallel(
        self: &Arc<Self>,
        pool: &WorkerPool,
        session: &Arc<dyn RuleSession>,
    ) -> Result<(), RuleError> {
        let dependencies = dependency_indices(&self.investigators);
        let abort = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel::<Completion>();
        let mut waiting: BTreeSet<usize> = (0 .. self.investigators.len()).collect();
        let mut running: BTreeSet<usize> = BTreeSet::new();
        let mut failure: Option<RuleError> = None;

        while !waiting.is_empty() && failure.is_none() {
            if self.token.is_cancelled() {
                failure = Some(RuleError::Cancelled);
                break;
            }
            let eligible: Vec<usize> = waiting
                .iter()
                .copied()
                .filter(|index| {
                    !running.contains(index)
                        && dependencies[*index].iter().all(|dep| !waiting.contains(dep))
                })
                .collect();
            for index in eligible {
                let context = Arc::clone(self);
                let session = Arc::clone(session);
                let abort = Arc::clone(&abort);
                let sender = sender.clone();
                let submitted = pool.execute(move || {
                    let outcome =
                        context.investigators[index].run(&context, session.as_ref(), &abort);
                    let _ = sender.send((index, outcome));
                });
                if let Err(err) = submitted {
                    failure = Some(err.into());
                    break;
                }
                debug!(
                    run_id = %self.run_id,
                    investigator = %self.investigators[index].id(),
                    "investigator started"
                );
                running.insert(index);
            }
            if failure.is_some() {
                break;
            }
            if running.is_empty() {
                let stuck = waiting
                    .iter()
                    .map(|index| self.investigators[*index].id().to_string())
                    .collect();
                failure = Some(RuleError::DependencyCycle(stuck));
                break;
            }
            let Ok((index, outcome)) = receiver.recv() else {
                failure = Some(RuleError::processor("investigator completion channel closed"));
                break;
            };
            running.remove(&index);
            waiting.remove(&index);
            if let Err(err) = outcome {
                failure = Some(self.classify(index, err));
            }
        }

        if !running.is_empty() {
            abort.store(true, Ordering::SeqCst);
            drop(sender);
            while !running.is_empty() {
                let Ok((index, _)) = receiver.recv() else {
                    break;
                };
                running.remove(&index);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Maps an investigator error to the run outcome.
    fn classify(&self, index: usize, err: RuleError) -> RuleError {
        if err.is_cancellation() {
            return RuleError::Cancelled;
        }
        RuleError::InvestigatorFailure {
            investigator: self.investigators[index].id().clone(),
            source: Box::new(err),
        }
    }
}
