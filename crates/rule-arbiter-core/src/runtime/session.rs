// crates/rule-arbiter-core/src/runtime/session.rs
// ============================================================================
// Module: Rule Arbiter Session Factory
// Description: Container registry and composite rule sessions.
// Purpose: Resolve logical session ids to concrete sessions behind one handle.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! The [`SessionFactory`] maps container ids to the session ids each
//! container provides, plus extra session ids bound to request kinds. It is
//! the only state mutated across runs, so every mutation and every
//! resolution read happens under one registry lock.
//!
//! [`SessionFactory::get_session`] unions the requested ids with those bound
//! to the request kind, opens one session per resolvable id, and wraps them
//! in a [`CompositeSession`] that fans calls out and sums results back in.
//! Unresolvable ids are logged and excluded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::Sender;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::core::error::RuleError;
use crate::core::identifiers::ContainerId;
use crate::core::identifiers::RequestKind;
use crate::core::identifiers::SessionId;
use crate::core::rule_info::RuleInfo;
use crate::interfaces::Fact;
use crate::interfaces::Global;
use crate::interfaces::RuleContainer;
use crate::interfaces::RuleSession;
use crate::interfaces::SessionError;

// ============================================================================
// SECTION: Registry State
// ============================================================================

/// A registered container and the sessions it was last seen to provide.
struct RegisteredContainer {
    /// Container handle.
    container: Arc<dyn RuleContainer>,
    /// Provided session ids.
    sessions: BTreeSet<SessionId>,
}

/// Registry contents guarded by the factory lock.
#[derive(Default)]
struct RegistryState {
    /// Containers keyed by id.
    containers: BTreeMap<ContainerId, RegisteredContainer>,
    /// Extra session ids bound to request kinds.
    request_sessions: BTreeMap<RequestKind, BTreeSet<SessionId>>,
}

/// Background refresh thread handle.
struct RefreshWorker {
    /// Dropping the sender stops the worker.
    stop: Sender<()>,
    /// Worker thread.
    handle: JoinHandle<()>,
}

// ============================================================================
// SECTION: Session Factory
// ============================================================================

/// Container registry resolving session ids to composite sessions.
pub struct SessionFactory {
    /// Registry state.
    state: Mutex<RegistryState>,
    /// Container consulted when no registered container provides an id.
    default_container: Option<Arc<dyn RuleContainer>>,
    /// Periodic refresh worker, when started.
    refresher: Mutex<Option<RefreshWorker>>,
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("containers", &self.container_ids().unwrap_or_default())
            .field("has_default_container", &self.default_container.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory {
    /// Creates an empty registry without a default container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            default_container: None,
            refresher: Mutex::new(None),
        }
    }

    /// Creates an empty registry that falls back to `container`.
    #[must_use]
    pub fn with_default_container(container: Arc<dyn RuleContainer>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            default_container: Some(container),
            refresher: Mutex::new(None),
        }
    }

    /// Locks the registry state.
    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>, RuleError> {
        self.state.lock().map_err(|_| RuleError::Poisoned("session registry"))
    }

    /// Registers a container, replacing any container with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn register_container(&self, container: Arc<dyn RuleContainer>) -> Result<(), RuleError> {
        let id = container.id();
        let sessions = container.provided_sessions();
        let replaced = self
            .lock()?
            .containers
            .insert(
                id.clone(),
                RegisteredContainer {
                    container,
                    sessions: sessions.clone(),
                },
            )
            .is_some();
        info!(container = %id, sessions = sessions.len(), replaced, "registered rule container");
        Ok(())
    }

    /// Registers a container unless its id is already taken.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::DuplicateContainer`] and keeps the prior
    /// registration when the id is taken.
    pub fn try_register_container(
        &self,
        container: Arc<dyn RuleContainer>,
    ) -> Result<(), RuleError> {
        let id = container.id();
        let sessions = container.provided_sessions();
        let mut state = self.lock()?;
        if state.containers.contains_key(&id) {
            warn!(container = %id, "container already registered");
            return Err(RuleError::DuplicateContainer(id));
        }
        state.containers.insert(
            id.clone(),
            RegisteredContainer {
                container,
                sessions,
            },
        );
        drop(state);
        info!(container = %id, "registered rule container");
        Ok(())
    }

    /// Removes a container. Returns false when it was not registered.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn deregister_container(&self, id: &ContainerId) -> Result<bool, RuleError> {
        let removed = self.lock()?.containers.remove(id).is_some();
        if removed {
            info!(container = %id, "deregistered rule container");
        }
        Ok(removed)
    }

    /// Records a container's updated session set.
    ///
    /// The update is ignored unless the container is still registered.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn container_updated(
        &self,
        id: &ContainerId,
        sessions: BTreeSet<SessionId>,
    ) -> Result<bool, RuleError> {
        let mut state = self.lock()?;
        let Some(entry) = state.containers.get_mut(id) else {
            debug!(container = %id, "ignoring update for deregistered container");
            return Ok(false);
        };
        entry.sessions = sessions;
        drop(state);
        info!(container = %id, "refreshed rule container sessions");
        Ok(true)
    }

    /// Re-reads one container's provided sessions.
    ///
    /// The container is queried outside the lock; the result is applied only
    /// if the same container instance is still registered.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn refresh_container(&self, id: &ContainerId) -> Result<bool, RuleError> {
        let Some(container) =
            self.lock()?.containers.get(id).map(|entry| Arc::clone(&entry.container))
        else {
            return Ok(false);
        };
        let sessions = container.provided_sessions();
        let mut state = self.lock()?;
        match state.containers.get_mut(id) {
            Some(entry) if Arc::ptr_eq(&entry.container, &container) => {
                entry.sessions = sessions;
                Ok(true)
            }
            _ => {
                debug!(container = %id, "container changed during refresh");
                Ok(false)
            }
        }
    }

    /// Refreshes every registered container, returning how many were updated.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn refresh_all(&self) -> Result<usize, RuleError> {
        let mut refreshed = 0;
        for id in self.container_ids()? {
            if self.refresh_container(&id)? {
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// Returns the registered container ids.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn container_ids(&self) -> Result<Vec<ContainerId>, RuleError> {
        Ok(self.lock()?.containers.keys().cloned().collect())
    }

    /// Binds an extra session id to a request kind.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn register_session(
        &self,
        kind: &RequestKind,
        session: SessionId,
    ) -> Result<(), RuleError> {
        self.lock()?.request_sessions.entry(kind.clone()).or_default().insert(session);
        Ok(())
    }

    /// Unbinds a session id, pruning the kind once it has none left.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn deregister_session(
        &self,
        kind: &RequestKind,
        session: &SessionId,
    ) -> Result<bool, RuleError> {
        let mut state = self.lock()?;
        let Some(sessions) = state.request_sessions.get_mut(kind) else {
            return Ok(false);
        };
        let removed = sessions.remove(session);
        if sessions.is_empty() {
            state.request_sessions.remove(kind);
        }
        Ok(removed)
    }

    /// Returns the session ids bound to a request kind.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn sessions_for(&self, kind: &RequestKind) -> Result<BTreeSet<SessionId>, RuleError> {
        Ok(self.lock()?.request_sessions.get(kind).cloned().unwrap_or_default())
    }

    /// Opens a composite session for a request kind.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    /// Individual sessions that fail to open are logged and excluded.
    pub fn get_session(
        &self,
        kind: &RequestKind,
        explicit: &[SessionId],
    ) -> Result<CompositeSession, RuleError> {
        let resolved = {
            let state = self.lock()?;
            let mut ids: BTreeSet<SessionId> = explicit.iter().cloned().collect();
            if let Some(bound) = state.request_sessions.get(kind) {
                ids.extend(bound.iter().cloned());
            }
            ids.into_iter()
                .map(|id| {
                    let container = state
                        .containers
                        .values()
                        .find(|entry| entry.sessions.contains(&id))
                        .map(|entry| Arc::clone(&entry.container))
                        .or_else(|| self.default_container.clone());
                    (id, container)
                })
                .collect::<Vec<_>>()
        };
        let mut sessions = Vec::with_capacity(resolved.len());
        for (id, container) in resolved {
            let Some(container) = container else {
                error!(request = %kind, session = %id, "no container provides session");
                continue;
            };
            match container.new_session(&id) {
                Ok(session) => sessions.push((id, session)),
                Err(err) => {
                    error!(
                        request = %kind,
                        session = %id,
                        container = %container.id(),
                        error = %err,
                        "failed to open rule session"
                    );
                }
            }
        }
        Ok(CompositeSession {
            sessions,
        })
    }

    /// Returns rule info from every container, including the default one.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn rule_info(&self) -> Result<Vec<RuleInfo>, RuleError> {
        let containers: Vec<Arc<dyn RuleContainer>> = self
            .lock()?
            .containers
            .values()
            .map(|entry| Arc::clone(&entry.container))
            .chain(self.default_container.clone())
            .collect();
        Ok(containers.iter().flat_map(|container| container.rule_info()).collect())
    }

    /// Returns rule info restricted to `sessions`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the registry lock is poisoned.
    pub fn rule_info_for_sessions(
        &self,
        sessions: &BTreeSet<SessionId>,
    ) -> Result<Vec<RuleInfo>, RuleError> {
        Ok(self.rule_info()?.into_iter().filter(|info| sessions.contains(&info.session)).collect())
    }

    /// Starts refreshing every container on a fixed interval.
    ///
    /// The worker stops when the factory is dropped or
    /// [`SessionFactory::stop_refresh`] is called. Starting again replaces
    /// the running worker.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Processor`] when the worker thread cannot spawn.
    pub fn start_refresh(self: &Arc<Self>, interval: Duration) -> Result<(), RuleError> {
        self.stop_refresh();
        let (stop, stopped) = mpsc::channel::<()>();
        let factory: Weak<Self> = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("container-refresh".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                    let Some(factory) = factory.upgrade() else {
                        return;
                    };
                    match factory.refresh_all() {
                        Ok(count) => debug!(containers = count, "refreshed rule containers"),
                        Err(err) => error!(error = %err, "container refresh failed"),
                    }
                }
            })
            .map_err(|err| RuleError::processor(format!("failed to spawn refresh worker: {err}")))?;
        if let Ok(mut slot) = self.refresher.lock() {
            *slot = Some(RefreshWorker {
                stop,
                handle,
            });
        }
        Ok(())
    }

    /// Stops the refresh worker, if running.
    pub fn stop_refresh(&self) {
        let worker = self.refresher.lock().ok().and_then(|mut slot| slot.take());
        if let Some(worker) = worker {
            drop(worker.stop);
            if worker.handle.thread().id() != thread::current().id()
                && worker.handle.join().is_err()
            {
                error!("container refresh worker terminated abnormally");
            }
        }
    }
}

impl Drop for SessionFactory {
    fn drop(&mut self) {
        self.stop_refresh();
    }
}

// ============================================================================
// SECTION: Composite Session
// ============================================================================

/// Session fanning every call out to several underlying sessions.
pub struct CompositeSession {
    /// Underlying sessions with the ids they were opened for.
    sessions: Vec<(SessionId, Box<dyn RuleSession>)>,
}

impl fmt::Debug for CompositeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSession").field("sessions", &self.session_ids()).finish()
    }
}

impl CompositeSession {
    /// Wraps already-open sessions.
    #[must_use]
    pub fn new(sessions: Vec<(SessionId, Box<dyn RuleSession>)>) -> Self {
        Self {
            sessions,
        }
    }

    /// Returns the ids of the underlying sessions.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Returns true when no session was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl RuleSession for CompositeSession {
    fn insert(&self, fact: Fact) -> Result<(), SessionError> {
        for (_, session) in &self.sessions {
            session.insert(Arc::clone(&fact))?;
        }
        Ok(())
    }

    fn facts(&self) -> Vec<Fact> {
        let mut seen = BTreeSet::new();
        let mut facts = Vec::new();
        for (_, session) in &self.sessions {
            for fact in session.facts() {
                if seen.insert(Arc::as_ptr(&fact).cast::<()>().addr()) {
                    facts.push(fact);
                }
            }
        }
        facts
    }

    fn set_global(&self, name: &str, value: Global) -> Result<(), SessionError> {
        for (_, session) in &self.sessions {
            session.set_global(name, Arc::clone(&value))?;
        }
        Ok(())
    }

    fn global(&self, name: &str) -> Option<Global> {
        self.sessions.iter().find_map(|(_, session)| session.global(name))
    }

    fn run_rules(&self) -> Result<u64, SessionError> {
        let mut fired = 0_u64;
        for (_, session) in &self.sessions {
            fired = fired.saturating_add(session.run_rules()?);
        }
        Ok(fired)
    }

    fn halt(&self) {
        for (_, session) in &self.sessions {
            session.halt();
        }
    }

    fn rule_count(&self) -> usize {
        self.sessions.iter().map(|(_, session)| session.rule_count()).sum()
    }

    fn rule_histogram(&self) -> BTreeMap<String, u64> {
        let mut histogram = BTreeMap::new();
        for (_, session) in &self.sessions {
            for (rule, fired) in session.rule_histogram() {
                let count: &mut u64 = histogram.entry(rule).or_default();
                *count = count.saturating_add(fired);
            }
        }
        histogram
    }

    fn close(&self) -> Result<(), SessionError> {
        for (id, session) in &self.sessions {
            if let Err(err) = session.close() {
                error!(session = %id, error = %err, "failed to close rule session");
            }
        }
        Ok(())
    }
}
