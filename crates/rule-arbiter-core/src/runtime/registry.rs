// crates/rule-arbiter-core/src/runtime/registry.rs
// ============================================================================
// Module: Rule Arbiter Registry
// Description: Explicit request-kind to arbiter and investigator bindings.
// Purpose: Resolve the processors for a request without runtime reflection.
// Dependencies: crate::{core, runtime}, tracing
// ============================================================================

//! ## Overview
//! The [`ArbiterRegistry`] is built once at startup and then shared
//! read-only. Each request kind maps to exactly one
//! [`ArbiterRegistration`]: an arbiter factory plus the investigators that
//! gather facts for that kind. A second registration for a claimed kind is a
//! non-fatal conflict: the first one wins and the conflict is logged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;
use tracing::warn;

use crate::core::error::ProcessorKind;
use crate::core::error::RuleError;
use crate::core::identifiers::InvestigatorId;
use crate::core::identifiers::RequestKind;
use crate::core::identifiers::SessionId;
use crate::core::request::RuleRequest;
use crate::core::request::RuleResult;
use crate::runtime::arbiter::Arbiter;
use crate::runtime::investigator::InvestigatorBinding;
use crate::runtime::investigator::validate_bindings;

// ============================================================================
// SECTION: Registration
// ============================================================================

/// Factory producing a fresh arbiter per run.
type ArbiterFactory<R> = Arc<dyn Fn() -> Box<dyn Arbiter<R>> + Send + Sync>;

/// Arbiter and investigators bound to request type `R`.
pub struct ArbiterRegistration<R: RuleRequest> {
    /// Per-run arbiter factory.
    arbiter: ArbiterFactory<R>,
    /// Investigators gathering facts for `R`.
    investigators: Vec<InvestigatorBinding<R>>,
}

impl<R: RuleRequest> fmt::Debug for ArbiterRegistration<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArbiterRegistration")
            .field("request", &R::KIND)
            .field("investigators", &self.investigators)
            .finish_non_exhaustive()
    }
}

impl<R: RuleRequest> ArbiterRegistration<R> {
    /// Binds an arbiter factory.
    #[must_use]
    pub fn new<A, F>(factory: F) -> Self
    where
        A: Arbiter<R>,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            arbiter: Arc::new(move || -> Box<dyn Arbiter<R>> { Box::new(factory()) }),
            investigators: Vec::new(),
        }
    }

    /// Adds an investigator binding.
    #[must_use]
    pub fn investigator(mut self, binding: InvestigatorBinding<R>) -> Self {
        self.investigators.push(binding);
        self
    }

    /// Creates a fresh arbiter.
    #[must_use]
    pub fn new_arbiter(&self) -> Box<dyn Arbiter<R>> {
        (self.arbiter)()
    }

    /// Returns the investigator bindings.
    #[must_use]
    pub fn investigators(&self) -> &[InvestigatorBinding<R>] {
        &self.investigators
    }
}

/// Type-erased view of a registration.
trait ErasedRegistration: Send + Sync {
    /// Returns the registration for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns the bound result kind tag.
    fn result_kind(&self) -> &'static str;

    /// Returns the bound investigator ids.
    fn investigator_ids(&self) -> Vec<InvestigatorId>;

    /// Returns the session ids the arbiter always runs.
    fn rule_sets(&self) -> Vec<SessionId>;
}

impl<R: RuleRequest> ErasedRegistration for ArbiterRegistration<R> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn result_kind(&self) -> &'static str {
        <R::Result as RuleResult>::KIND
    }

    fn investigator_ids(&self) -> Vec<InvestigatorId> {
        self.investigators.iter().map(|binding| binding.id().clone()).collect()
    }

    fn rule_sets(&self) -> Vec<SessionId> {
        self.new_arbiter().rule_sets()
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Request-kind keyed registration table.
#[derive(Default)]
pub struct ArbiterRegistry {
    /// Registrations keyed by request kind.
    entries: BTreeMap<RequestKind, Arc<dyn ErasedRegistration>>,
}

impl fmt::Debug for ArbiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArbiterRegistry").field("requests", &self.known_requests()).finish()
    }
}

impl ArbiterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an arbiter and its investigators for `R`.
    ///
    /// Returns false, keeping the prior registration, when `R::KIND` is
    /// already claimed. A rejected registration's investigators are not
    /// validated.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MissingOptions`] for a blank request kind or
    /// malformed investigator ids, and [`RuleError::DependencyCycle`] when the
    /// investigator dependencies are cyclic.
    pub fn register<R: RuleRequest>(
        &mut self,
        registration: ArbiterRegistration<R>,
    ) -> Result<bool, RuleError> {
        let kind = R::kind();
        if kind.is_blank() {
            return Err(RuleError::MissingOptions("request kind is blank".to_string()));
        }
        if let Some(existing) = self.entries.get(&kind) {
            warn!(
                request = %kind,
                existing_result = existing.result_kind(),
                rejected_result = <R::Result as RuleResult>::KIND,
                "arbiter already registered for request; keeping the first registration"
            );
            return Ok(false);
        }
        validate_bindings(registration.investigators())?;
        info!(
            request = %kind,
            result = <R::Result as RuleResult>::KIND,
            investigators = registration.investigators().len(),
            "registered arbiter"
        );
        self.entries.insert(kind, Arc::new(registration));
        Ok(true)
    }

    /// Returns the registration for `R`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::NotRegistered`] when no arbiter is bound to
    /// `R::KIND`, and [`RuleError::MissingOptions`] when the kind is bound to
    /// a different request type.
    pub fn lookup<R: RuleRequest>(&self) -> Result<&ArbiterRegistration<R>, RuleError> {
        let kind = R::kind();
        let entry = self.entries.get(&kind).ok_or_else(|| RuleError::NotRegistered {
            what: ProcessorKind::Arbiter,
            kind: kind.clone(),
        })?;
        entry.as_any().downcast_ref::<ArbiterRegistration<R>>().ok_or_else(|| {
            RuleError::MissingOptions(format!("request kind {kind} is bound to another type"))
        })
    }

    /// Returns every registered request kind.
    #[must_use]
    pub fn known_requests(&self) -> Vec<RequestKind> {
        self.entries.keys().cloned().collect()
    }

    /// Returns the result kind bound to a request kind.
    #[must_use]
    pub fn result_kind(&self, kind: &RequestKind) -> Option<&'static str> {
        self.entries.get(kind).map(|entry| entry.result_kind())
    }

    /// Returns the investigator ids bound to a request kind.
    #[must_use]
    pub fn investigators_for(&self, kind: &RequestKind) -> Vec<InvestigatorId> {
        self.entries.get(kind).map(|entry| entry.investigator_ids()).unwrap_or_default()
    }

    /// Returns the session ids the arbiter bound to a request kind always runs.
    #[must_use]
    pub fn rule_sets_for(&self, kind: &RequestKind) -> Vec<SessionId> {
        self.entries.get(kind).map(|entry| entry.rule_sets()).unwrap_or_default()
    }
}
