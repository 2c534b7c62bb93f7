// crates/rule-arbiter-core/src/runtime/cancel.rs
// ============================================================================
// Module: Rule Arbiter Cancellation
// Description: Per-run cooperative cancellation token.
// Purpose: Stop scheduling and halt the evaluating session of one run.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! A [`CancellationToken`] is shared by everything participating in one run.
//! Cancelling it sets a flag consulted before every scheduling decision and
//! halts the rule session currently registered as evaluating, if any.
//! Cancellation is cooperative: work that never checks the token runs to
//! completion.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::core::error::RuleError;
use crate::interfaces::RuleSession;

// ============================================================================
// SECTION: Token
// ============================================================================

/// Shared token state.
#[derive(Default)]
struct TokenState {
    /// Set once cancellation is requested.
    cancelled: AtomicBool,
    /// Session to halt on cancellation.
    active_session: Mutex<Option<Arc<dyn RuleSession>>>,
}

/// Cooperative cancellation token for one run.
#[derive(Clone, Default)]
pub struct CancellationToken {
    /// Shared state.
    inner: Arc<TokenState>,
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns false when it was already requested.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Ok(slot) = self.inner.active_session.lock()
            && let Some(session) = slot.as_ref()
        {
            session.halt();
        }
        true
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`RuleError::Cancelled`] once cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Cancelled`] when the token is cancelled.
    pub fn check(&self) -> Result<(), RuleError> {
        if self.is_cancelled() { Err(RuleError::Cancelled) } else { Ok(()) }
    }

    /// Registers `session` as evaluating until the returned guard drops.
    ///
    /// A session registered after cancellation is halted immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Poisoned`] when the slot lock is poisoned.
    pub fn activate(&self, session: Arc<dyn RuleSession>) -> Result<ActiveSession, RuleError> {
        {
            let mut slot = self
                .inner
                .active_session
                .lock()
                .map_err(|_| RuleError::Poisoned("active session slot"))?;
            *slot = Some(Arc::clone(&session));
        }
        if self.is_cancelled() {
            session.halt();
        }
        Ok(ActiveSession {
            token: self.clone(),
        })
    }
}

/// Guard clearing the active session slot on drop.
#[derive(Debug)]
pub struct ActiveSession {
    /// Token whose slot is cleared.
    token: CancellationToken,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.token.inner.active_session.lock() {
            slot.take();
        }
    }
}
