// crates/rule-arbiter-core/src/runtime/service.rs
// ============================================================================
// Module: Rule Arbiter Service
// Description: Top-level run scheduling, deduplication, and lifecycle logging.
// Purpose: Expose the orchestrator to callers as one thread-safe facade.
// Dependencies: crate::{core, interfaces, runtime}, serde_json, tracing
// ============================================================================

//! ## Overview
//! [`RuleService`] schedules arbiter runs onto a bounded pool, records each
//! run in the run log as it moves through `PENDING -> RUNNING -> SUCCESS |
//! FAILURE | CANCELED`, stores committed results, and relays cancellation by
//! run id.
//!
//! Per-run failures never escape as errors: they are logged, recorded as
//! `FAILURE` with the error text, and reported as an absent result. Errors
//! returned by service methods describe problems before a run exists
//! (unregistered request, unusable store) or while reading stored data.
//!
//! Without a run log, run ids come from a process-local counter and
//! [`RuleService::find_id`] and [`RuleService::get_state`] report nothing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::error::RuleError;
use crate::core::identifiers::RequestKind;
use crate::core::identifiers::RunId;
use crate::core::request::RuleRequest;
use crate::core::request::RuleResult;
use crate::core::rule_info::RuleInfo;
use crate::core::run_log::NewRunLogEntry;
use crate::core::run_log::RunLogEntry;
use crate::core::run_log::RunState;
use crate::core::time::Timestamp;
use crate::interfaces::JsonSerializer;
use crate::interfaces::ResultStore;
use crate::interfaces::RunLog;
use crate::interfaces::Serializer;
use crate::interfaces::StoredResult;
use crate::runtime::arbiter::Arbiter;
use crate::runtime::arbiter::process_rules;
use crate::runtime::cancel::CancellationToken;
use crate::runtime::context::RunContext;
use crate::runtime::investigator::InvestigatorBinding;
use crate::runtime::pool::FullQueuePolicy;
use crate::runtime::pool::WorkerPool;
use crate::runtime::pool::WorkerPoolConfig;
use crate::runtime::registry::ArbiterRegistry;
use crate::runtime::session::SessionFactory;
use crate::runtime::stats::RuleStatsSnapshot;
use crate::runtime::store::InMemoryResultStore;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default arbiter pool size.
pub const DEFAULT_ARBITER_POOL_SIZE: usize = 4;
/// Default arbiter queue capacity.
pub const DEFAULT_ARBITER_QUEUE_CAPACITY: usize = 100;
/// Default investigator pool size.
pub const DEFAULT_INVESTIGATOR_POOL_SIZE: usize = 10;
/// Investigator queue slots per arbiter worker when no capacity is set.
pub const INVESTIGATOR_QUEUE_PER_ARBITER: usize = 10;

/// Pool sizing and gathering mode for [`RuleService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleServiceConfig {
    /// Concurrent runs.
    pub arbiter_pool_size: usize,
    /// Runs queued beyond the running ones.
    pub arbiter_queue_capacity: usize,
    /// Concurrent investigator tasks across all runs.
    pub investigator_pool_size: usize,
    /// Investigator tasks queued beyond the running ones; `None` sizes the
    /// queue from `arbiter_pool_size`.
    pub investigator_queue_capacity: Option<usize>,
    /// Full-queue behavior for both pools.
    pub full_queue_policy: FullQueuePolicy,
    /// Whether investigators of one run may gather in parallel.
    pub parallel_facts: bool,
}

impl Default for RuleServiceConfig {
    fn default() -> Self {
        Self {
            arbiter_pool_size: DEFAULT_ARBITER_POOL_SIZE,
            arbiter_queue_capacity: DEFAULT_ARBITER_QUEUE_CAPACITY,
            investigator_pool_size: DEFAULT_INVESTIGATOR_POOL_SIZE,
            investigator_queue_capacity: None,
            full_queue_policy: FullQueuePolicy::Block,
            parallel_facts: true,
        }
    }
}

impl RuleServiceConfig {
    /// Returns the investigator queue capacity, defaulting to
    /// [`INVESTIGATOR_QUEUE_PER_ARBITER`] slots per arbiter worker.
    #[must_use]
    pub const fn resolved_investigator_queue_capacity(&self) -> usize {
        match self.investigator_queue_capacity {
            Some(capacity) => capacity,
            None => self.arbiter_pool_size.saturating_mul(INVESTIGATOR_QUEUE_PER_ARBITER),
        }
    }
}

// ============================================================================
// SECTION: Run Reports
// ============================================================================

/// Final outcome of one run.
#[derive(Debug, Clone)]
pub struct RunReport<T> {
    /// Run identifier.
    pub run_id: RunId,
    /// Final state.
    pub state: RunState,
    /// Committed result, present only on success.
    pub result: Option<T>,
    /// Statistics collected during the run.
    pub stats: RuleStatsSnapshot,
    /// Failure detail.
    pub message: Option<String>,
}

/// Handle to a scheduled run.
#[derive(Debug)]
pub struct RunHandle<T> {
    /// Run identifier.
    run_id: RunId,
    /// Receives the report once the run ends.
    receiver: Receiver<RunReport<T>>,
}

impl<T> RunHandle<T> {
    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Blocks until the run ends and returns its result.
    ///
    /// Returns `None` when the run failed or was cancelled.
    #[must_use]
    pub fn wait(self) -> Option<T> {
        self.wait_report().and_then(|report| report.result)
    }

    /// Blocks until the run ends and returns its report.
    #[must_use]
    pub fn wait_report(self) -> Option<RunReport<T>> {
        self.receiver.recv().ok()
    }
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builder for [`RuleService`].
pub struct RuleServiceBuilder {
    /// Arbiter registrations.
    registry: ArbiterRegistry,
    /// Session registry.
    sessions: Option<Arc<SessionFactory>>,
    /// Run log.
    run_log: Option<Arc<dyn RunLog>>,
    /// Result store.
    results: Option<Arc<dyn ResultStore>>,
    /// Byte codec for stored requests and results.
    serializer: Option<Arc<dyn Serializer>>,
    /// Pool sizing.
    config: RuleServiceConfig,
}

impl fmt::Debug for RuleServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleServiceBuilder")
            .field("registry", &self.registry)
            .field("has_run_log", &self.run_log.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RuleServiceBuilder {
    /// Uses an existing session registry.
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<SessionFactory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Records runs in `run_log`.
    #[must_use]
    pub fn run_log(mut self, run_log: Arc<dyn RunLog>) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Stores results in `results` instead of memory.
    #[must_use]
    pub fn result_store(mut self, results: Arc<dyn ResultStore>) -> Self {
        self.results = Some(results);
        self
    }

    /// Uses `serializer` for stored requests and results.
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Sets pool sizing and gathering mode.
    #[must_use]
    pub fn config(mut self, config: RuleServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawns the pools and returns the service.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Pool`] when a pool cannot be created.
    pub fn build(self) -> Result<RuleService, RuleError> {
        let arbiter_pool = WorkerPool::new(&WorkerPoolConfig {
            name: "arbiter".to_string(),
            size: self.config.arbiter_pool_size,
            queue_capacity: self.config.arbiter_queue_capacity,
            policy: self.config.full_queue_policy,
        })?;
        let investigator_pool = WorkerPool::new(&WorkerPoolConfig {
            name: "investigator".to_string(),
            size: self.config.investigator_pool_size,
            queue_capacity: self.config.resolved_investigator_queue_capacity(),
            policy: self.config.full_queue_policy,
        })?;
        let engine = RunEngine {
            registry: self.registry,
            sessions: self.sessions.unwrap_or_default(),
            run_log: self.run_log,
            results: self.results.unwrap_or_else(|| Arc::new(InMemoryResultStore::new())),
            serializer: self.serializer.unwrap_or_else(|| Arc::new(JsonSerializer)),
            investigator_pool: Arc::new(investigator_pool),
            parallel: self.config.parallel_facts,
            last_id: AtomicU64::new(0),
            active: Mutex::new(BTreeMap::new()),
        };
        Ok(RuleService {
            engine: Arc::new(engine),
            arbiter_pool,
        })
    }
}

// ============================================================================
// SECTION: Rule Service
// ============================================================================

/// Thread-safe orchestrator facade.
pub struct RuleService {
    /// Shared run machinery.
    engine: Arc<RunEngine>,
    /// Pool running scheduled runs.
    arbiter_pool: WorkerPool,
}

impl fmt::Debug for RuleService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleService")
            .field("registry", &self.engine.registry)
            .field("arbiter_pool", &self.arbiter_pool.name())
            .finish_non_exhaustive()
    }
}

impl RuleService {
    /// Starts building a service around `registry`.
    #[must_use]
    pub fn builder(registry: ArbiterRegistry) -> RuleServiceBuilder {
        RuleServiceBuilder {
            registry,
            sessions: None,
            run_log: None,
            results: None,
            serializer: None,
            config: RuleServiceConfig::default(),
        }
    }

    /// Returns the session registry.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionFactory> {
        &self.engine.sessions
    }

    /// Schedules a run and returns its id immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when no arbiter is bound to `R`, the run cannot
    /// be logged, or the arbiter pool rejects the run.
    pub fn schedule<R: RuleRequest>(&self, request: R) -> Result<RunId, RuleError> {
        self.submit(request).map(|handle| handle.run_id())
    }

    /// Schedules a run and returns a handle resolving to its result.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when no arbiter is bound to `R`, the run cannot
    /// be logged, or the arbiter pool rejects the run.
    pub fn submit<R: RuleRequest>(&self, request: R) -> Result<RunHandle<R::Result>, RuleError> {
        let prepared = self.engine.prepare(request)?;
        let run_id = prepared.run_id;
        let (sender, receiver) = mpsc::sync_channel(1);
        let engine = Arc::clone(&self.engine);
        let submitted = self.arbiter_pool.execute(move || {
            let report = engine.execute(prepared);
            let _ = sender.send(report);
        });
        if let Err(err) = submitted {
            self.engine.abandon(run_id, &err.to_string());
            return Err(err.into());
        }
        info!(run_id = %run_id, request = R::KIND, "run scheduled");
        Ok(RunHandle {
            run_id,
            receiver,
        })
    }

    /// Runs the pipeline on the calling thread.
    ///
    /// Returns `Ok(None)` when the run failed or was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when no arbiter is bound to `R` or the run
    /// cannot be logged.
    pub fn run<R: RuleRequest>(&self, request: R) -> Result<Option<R::Result>, RuleError> {
        Ok(self.run_report(request)?.result)
    }

    /// Runs the pipeline on the calling thread and returns the full report.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when no arbiter is bound to `R` or the run
    /// cannot be logged.
    pub fn run_report<R: RuleRequest>(
        &self,
        request: R,
    ) -> Result<RunReport<R::Result>, RuleError> {
        let prepared = self.engine.prepare(request)?;
        Ok(self.engine.execute(prepared))
    }

    /// Loads the stored result of a run.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Store`] when the store fails and
    /// [`RuleError::Deserialization`] when the stored result is not a `T`.
    pub fn get_result<T: RuleResult>(&self, run_id: RunId) -> Result<Option<T>, RuleError> {
        let Some(stored) = self.engine.results.load(run_id)? else {
            return Ok(None);
        };
        if stored.result_kind != T::KIND {
            return Err(RuleError::Deserialization(format!(
                "run {run_id} stored a {} result, not {}",
                stored.result_kind,
                T::KIND
            )));
        }
        self.engine.decode(&stored.payload).map(Some)
    }

    /// Finds the newest run of an equal request.
    ///
    /// Candidates share the request kind and hash; the stored request must
    /// also deserialize to a value equal to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when hashing or the log lookup fails.
    pub fn find_id<R: RuleRequest>(&self, request: &R) -> Result<Option<RunId>, RuleError> {
        let Some(run_log) = &self.engine.run_log else {
            return Ok(None);
        };
        let hash = request.request_hash()?;
        for candidate in run_log.find_by_request(&R::kind(), &hash)? {
            match self.engine.decode::<R>(&candidate.request_bytes) {
                Ok(stored) if &stored == request => return Ok(Some(candidate.run_id)),
                Ok(_) => {
                    debug!(run_id = %candidate.run_id, "request hash collision");
                }
                Err(err) => {
                    warn!(run_id = %candidate.run_id, error = %err, "undecodable stored request");
                }
            }
        }
        Ok(None)
    }

    /// Returns the logged state of a run.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Store`] when the log lookup fails.
    pub fn get_state(&self, run_id: RunId) -> Result<Option<RunState>, RuleError> {
        let Some(run_log) = &self.engine.run_log else {
            return Ok(None);
        };
        Ok(run_log.find(run_id)?.map(|entry| entry.state))
    }

    /// Requests cancellation of an active run.
    ///
    /// Returns true when a signal was delivered. Unknown, completed, or
    /// already cancelled runs are left untouched.
    pub fn cancel(&self, run_id: RunId) -> bool {
        let token = self
            .engine
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(&run_id).cloned());
        let delivered = token.is_some_and(|token| token.cancel());
        if delivered {
            info!(run_id = %run_id, "run cancellation requested");
        }
        delivered
    }

    /// Returns every registered request kind.
    #[must_use]
    pub fn known_requests(&self) -> Vec<RequestKind> {
        self.engine.registry.known_requests()
    }

    /// Returns the result kind bound to a request kind.
    #[must_use]
    pub fn result_kind(&self, kind: &RequestKind) -> Option<&'static str> {
        self.engine.registry.result_kind(kind)
    }

    /// Returns rule info from every registered container.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the session registry is poisoned.
    pub fn rule_info(&self) -> Result<Vec<RuleInfo>, RuleError> {
        self.engine.sessions.rule_info()
    }

    /// Returns rule info for the sessions a request kind runs.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the session registry is poisoned.
    pub fn rule_info_for(&self, kind: &RequestKind) -> Result<Vec<RuleInfo>, RuleError> {
        let mut sessions: BTreeSet<_> = self.engine.sessions.sessions_for(kind)?;
        sessions.extend(self.engine.registry.rule_sets_for(kind));
        self.engine.sessions.rule_info_for_sessions(&sessions)
    }

    /// Deletes log entries and results older than `age`.
    ///
    /// Returns the number of runs purged; zero without a run log.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Store`] when deletion fails.
    pub fn purge_older_than(&self, age: Duration) -> Result<usize, RuleError> {
        let Some(run_log) = &self.engine.run_log else {
            return Ok(0);
        };
        let cutoff = Timestamp::now().saturating_sub(age);
        let purged = run_log.delete_older_than(cutoff)?;
        for run_id in &purged {
            self.engine.results.remove(*run_id)?;
        }
        info!(runs = purged.len(), "purged expired runs");
        Ok(purged.len())
    }
}

// ============================================================================
// SECTION: Run Engine
// ============================================================================

/// A run ready to execute.
struct PreparedRun<R: RuleRequest> {
    /// Run identifier.
    run_id: RunId,
    /// Request.
    request: R,
    /// Log entry, when a log is configured.
    entry: Option<RunLogEntry>,
    /// Run cancellation token.
    token: CancellationToken,
    /// Arbiter for this run.
    arbiter: Box<dyn Arbiter<R>>,
    /// Investigators for this run.
    investigators: Vec<InvestigatorBinding<R>>,
}

/// Shared run machinery used by the service and its pool jobs.
struct RunEngine {
    /// Arbiter registrations.
    registry: ArbiterRegistry,
    /// Session registry.
    sessions: Arc<SessionFactory>,
    /// Run log.
    run_log: Option<Arc<dyn RunLog>>,
    /// Result store.
    results: Arc<dyn ResultStore>,
    /// Byte codec.
    serializer: Arc<dyn Serializer>,
    /// Pool for parallel gathering.
    investigator_pool: Arc<WorkerPool>,
    /// Whether gathering may run in parallel.
    parallel: bool,
    /// Last run id issued without a log.
    last_id: AtomicU64,
    /// Tokens of runs that have not finished.
    active: Mutex<BTreeMap<RunId, CancellationToken>>,
}

impl RunEngine {
    /// Encodes a value with the configured serializer.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, RuleError> {
        let value =
            serde_json::to_value(value).map_err(|err| RuleError::Serialization(err.to_string()))?;
        Ok(self.serializer.serialize(&value)?)
    }

    /// Decodes a value with the configured serializer.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, RuleError> {
        let value = self.serializer.deserialize(bytes)?;
        serde_json::from_value(value).map_err(|err| RuleError::Deserialization(err.to_string()))
    }

    /// Resolves processors, logs the pending run, and registers its token.
    fn prepare<R: RuleRequest>(&self, request: R) -> Result<PreparedRun<R>, RuleError> {
        let registration = self.registry.lookup::<R>()?;
        let arbiter = registration.new_arbiter();
        let investigators = registration.investigators().to_vec();
        let entry = match &self.run_log {
            Some(run_log) => Some(run_log.create(NewRunLogEntry {
                created_at: Timestamp::now(),
                request_kind: R::kind(),
                request_hash: request.request_hash()?,
                request_bytes: self.encode(&request)?,
                request_description: request.describe(),
                result_kind: <R::Result as RuleResult>::KIND.to_string(),
            })?),
            None => None,
        };
        let run_id = match &entry {
            Some(entry) => entry.run_id,
            None => RunId::new(self.last_id.fetch_add(1, Ordering::SeqCst).saturating_add(1)),
        };
        let token = CancellationToken::new();
        self.active
            .lock()
            .map_err(|_| RuleError::Poisoned("active runs"))?
            .insert(run_id, token.clone());
        Ok(PreparedRun {
            run_id,
            request,
            entry,
            token,
            arbiter,
            investigators,
        })
    }

    /// Executes a prepared run to completion and records its outcome.
    fn execute<R: RuleRequest>(&self, prepared: PreparedRun<R>) -> RunReport<R::Result> {
        let PreparedRun {
            run_id,
            request,
            mut entry,
            token,
            mut arbiter,
            investigators,
        } = prepared;
        self.record(entry.as_mut(), RunState::Running, None, None);

        let mut context = RunContext::new(run_id, request, Arc::clone(&self.sessions))
            .with_investigators(investigators)
            .with_token(token);
        if self.parallel {
            context = context.with_pool(Arc::clone(&self.investigator_pool));
        }
        let context = Arc::new(context);
        let outcome = catch_unwind(AssertUnwindSafe(|| process_rules(arbiter.as_mut(), &context)))
            .unwrap_or_else(|_| Err(RuleError::processor("arbiter panicked")));
        let stats = context.stats().map(|stats| stats.snapshot()).unwrap_or_default();

        let (state, result, message) = match outcome {
            Ok(result) => match self.store_result(run_id, &*result) {
                Ok(()) => (RunState::Success, Some((*result).clone()), None),
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "failed to store result");
                    (RunState::Failure, None, Some(err.to_string()))
                }
            },
            Err(err) if err.is_cancellation() => (RunState::Canceled, None, None),
            Err(err) => (RunState::Failure, None, Some(err.to_string())),
        };
        let description = result.as_ref().map(RuleResult::describe);
        self.record(entry.as_mut(), state, description, message.clone());
        self.release(run_id);
        info!(run_id = %run_id, state = %state, "run finished");
        RunReport {
            run_id,
            state,
            result,
            stats,
            message,
        }
    }

    /// Serializes and stores a committed result.
    fn store_result<T: RuleResult>(&self, run_id: RunId, result: &T) -> Result<(), RuleError> {
        let payload = self.encode(result)?;
        self.results.save(
            run_id,
            &StoredResult {
                result_kind: T::KIND.to_string(),
                payload,
            },
        )?;
        Ok(())
    }

    /// Writes a state transition to the log, if any.
    fn record(
        &self,
        entry: Option<&mut RunLogEntry>,
        state: RunState,
        result_description: Option<String>,
        message: Option<String>,
    ) {
        let (Some(run_log), Some(entry)) = (&self.run_log, entry) else {
            return;
        };
        entry.transition(state, Timestamp::now());
        if result_description.is_some() {
            entry.result_description = result_description;
        }
        entry.message = message;
        if let Err(err) = run_log.update(entry) {
            warn!(run_id = %entry.run_id, state = %state, error = %err, "failed to update run log");
        }
    }

    /// Marks a run that never reached a worker as failed.
    fn abandon(&self, run_id: RunId, message: &str) {
        if let Some(run_log) = &self.run_log {
            match run_log.find(run_id) {
                Ok(Some(mut entry)) => {
                    let message = Some(message.to_string());
                    self.record(Some(&mut entry), RunState::Failure, None, message);
                }
                Ok(None) => {}
                Err(err) => warn!(run_id = %run_id, error = %err, "failed to load run log entry"),
            }
        }
        self.release(run_id);
    }

    /// Forgets the cancellation token of a finished run.
    fn release(&self, run_id: RunId) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&run_id);
        }
    }
}
