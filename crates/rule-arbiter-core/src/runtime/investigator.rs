// crates/rule-arbiter-core/src/runtime/investigator.rs
// ============================================================================
// Module: Rule Arbiter Investigators
// Description: Fact-gathering contract, fact pipeline, and registration bindings.
// Purpose: Populate a rule session's working memory before evaluation.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! An [`Investigator`] gathers facts of one type for one request kind. The
//! framework wraps `before_gather`, `gather`, and `after_gather` with fact
//! statistics and pushes every gathered fact through the investigator's
//! [`FactPipeline`]: filters may drop it, mutators may adjust it, and
//! aggregators observe it and emit derived facts once gathering ends.
//!
//! Investigators are created per run from an [`InvestigatorBinding`], which
//! also declares the investigators that must finish first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::core::error::RuleError;
use crate::core::identifiers::InvestigatorId;
use crate::core::request::RuleRequest;
use crate::interfaces::Fact;
use crate::interfaces::RuleSession;
use crate::runtime::cancel::CancellationToken;
use crate::runtime::context::RunContext;
use crate::runtime::stats::short_type_name;

// ============================================================================
// SECTION: Fact Pipeline
// ============================================================================

/// Predicate deciding whether a fact is kept.
type FactFilter<F> = Box<dyn Fn(&F) -> bool + Send>;

/// In-place fact adjustment.
type FactMutator<F> = Box<dyn Fn(&mut F) + Send>;

/// Observer emitting derived facts once gathering ends.
pub trait FactAggregator<F>: Send {
    /// Type name under which emitted facts are counted.
    fn fact_type(&self) -> &str;

    /// Observes a fact that passed every filter.
    fn observe(&mut self, fact: &F);

    /// Returns the derived facts to insert.
    fn finish(&mut self) -> Vec<Fact>;
}

/// Ordered fact functions applied before insertion.
pub struct FactPipeline<F> {
    /// Filters, applied first.
    filters: Vec<FactFilter<F>>,
    /// Mutators, applied to facts that pass every filter.
    mutators: Vec<FactMutator<F>>,
    /// Aggregators, observing mutated facts.
    aggregators: Vec<Box<dyn FactAggregator<F>>>,
}

impl<F> Default for FactPipeline<F> {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            mutators: Vec::new(),
            aggregators: Vec::new(),
        }
    }
}

impl<F> fmt::Debug for FactPipeline<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactPipeline")
            .field("filters", &self.filters.len())
            .field("mutators", &self.mutators.len())
            .field("aggregators", &self.aggregators.len())
            .finish()
    }
}

impl<F> FactPipeline<F> {
    /// Creates an empty pipeline that inserts every fact unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter; facts for which it returns false are dropped.
    #[must_use]
    pub fn filter(mut self, filter: impl Fn(&F) -> bool + Send + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Adds a mutator.
    #[must_use]
    pub fn mutate(mut self, mutator: impl Fn(&mut F) + Send + 'static) -> Self {
        self.mutators.push(Box::new(mutator));
        self
    }

    /// Adds an aggregator.
    #[must_use]
    pub fn aggregate(mut self, aggregator: impl FactAggregator<F> + 'static) -> Self {
        self.aggregators.push(Box::new(aggregator));
        self
    }

    /// Runs filters and mutators, returning the fact to insert.
    fn apply(&mut self, mut fact: F) -> Option<F> {
        if !self.filters.iter().all(|filter| filter(&fact)) {
            return None;
        }
        for mutator in &self.mutators {
            mutator(&mut fact);
        }
        for aggregator in &mut self.aggregators {
            aggregator.observe(&fact);
        }
        Some(fact)
    }
}

// ============================================================================
// SECTION: Fact Sink
// ============================================================================

/// Insertion handle given to [`Investigator::gather`].
pub struct FactSink<'a, F> {
    /// Target session.
    session: &'a dyn RuleSession,
    /// Pipeline applied to each fact.
    pipeline: &'a mut FactPipeline<F>,
    /// Run token.
    token: &'a CancellationToken,
    /// Set when a sibling investigator failed.
    abort: &'a AtomicBool,
    /// Facts inserted so far.
    inserted: u64,
}

impl<F> fmt::Debug for FactSink<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactSink").field("inserted", &self.inserted).finish_non_exhaustive()
    }
}

impl<F: Any + Send + Sync> FactSink<'_, F> {
    /// Pushes a fact through the pipeline and inserts it.
    ///
    /// Returns false when a filter dropped the fact.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Cancelled`] once the run is stopping and
    /// [`RuleError::Session`] when the session rejects the fact.
    pub fn insert(&mut self, fact: F) -> Result<bool, RuleError> {
        self.check()?;
        let Some(fact) = self.pipeline.apply(fact) else {
            return Ok(false);
        };
        self.session.insert(Arc::new(fact))?;
        self.inserted = self.inserted.saturating_add(1);
        Ok(true)
    }

    /// Inserts every fact from an iterator, returning how many were kept.
    ///
    /// # Errors
    ///
    /// Returns the first insertion error.
    pub fn extend(&mut self, facts: impl IntoIterator<Item = F>) -> Result<u64, RuleError> {
        let mut kept = 0_u64;
        for fact in facts {
            if self.insert(fact)? {
                kept = kept.saturating_add(1);
            }
        }
        Ok(kept)
    }

    /// Fails once the run is stopping; long gathers should poll this.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Cancelled`] when the run is stopping.
    pub fn check(&self) -> Result<(), RuleError> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(RuleError::Cancelled);
        }
        self.token.check()
    }

    /// Returns facts inserted so far.
    #[must_use]
    pub const fn inserted(&self) -> u64 {
        self.inserted
    }
}

// ============================================================================
// SECTION: Investigator Contract
// ============================================================================

/// Gathers facts of one type for request type `R`.
pub trait Investigator<R: RuleRequest>: Send + 'static {
    /// Type of the facts this investigator inserts.
    type Fact: Any + Send + Sync;

    /// Returns the pipeline applied to gathered facts.
    fn pipeline(&self) -> FactPipeline<Self::Fact> {
        FactPipeline::new()
    }

    /// Runs before gathering.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] to abort the run.
    fn before_gather(&mut self, _ctx: &RunContext<R>) -> Result<(), RuleError> {
        Ok(())
    }

    /// Gathers facts into the sink.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] to abort the run.
    fn gather(
        &mut self,
        ctx: &RunContext<R>,
        sink: &mut FactSink<'_, Self::Fact>,
    ) -> Result<(), RuleError>;

    /// Runs after gathering and aggregation.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] to abort the run.
    fn after_gather(&mut self, _ctx: &RunContext<R>) -> Result<(), RuleError> {
        Ok(())
    }
}

/// Type-erased investigator instance.
pub(crate) trait DynInvestigator<R: RuleRequest>: Send {
    /// Runs the full gather sequence with statistics.
    fn run(
        &mut self,
        ctx: &RunContext<R>,
        session: &dyn RuleSession,
        abort: &AtomicBool,
    ) -> Result<(), RuleError>;
}

/// Adapter erasing the fact type of an [`Investigator`].
struct Erased<I> {
    /// Wrapped investigator.
    inner: I,
}

impl<R: RuleRequest, I: Investigator<R>> DynInvestigator<R> for Erased<I> {
    fn run(
        &mut self,
        ctx: &RunContext<R>,
        session: &dyn RuleSession,
        abort: &AtomicBool,
    ) -> Result<(), RuleError> {
        let fact_type = short_type_name::<I::Fact>();
        ctx.start_facts(fact_type)?;
        let outcome = self.gather_all(ctx, session, abort, fact_type);
        ctx.finish_facts(fact_type)?;
        outcome
    }
}

impl<I> Erased<I> {
    /// Runs hooks, gathering, and aggregation.
    fn gather_all<R>(
        &mut self,
        ctx: &RunContext<R>,
        session: &dyn RuleSession,
        abort: &AtomicBool,
        fact_type: &str,
    ) -> Result<(), RuleError>
    where
        R: RuleRequest,
        I: Investigator<R>,
    {
        self.inner.before_gather(ctx)?;
        let mut pipeline = self.inner.pipeline();
        let mut sink = FactSink {
            session,
            pipeline: &mut pipeline,
            token: ctx.token(),
            abort,
            inserted: 0,
        };
        self.inner.gather(ctx, &mut sink)?;
        let inserted = sink.inserted();
        ctx.add_facts(fact_type, inserted)?;
        for aggregator in &mut pipeline.aggregators {
            let derived = aggregator.finish();
            let emitted = u64::try_from(derived.len()).unwrap_or(u64::MAX);
            for fact in derived {
                session.insert(fact)?;
            }
            ctx.add_facts(aggregator.fact_type(), emitted)?;
        }
        self.inner.after_gather(ctx)
    }
}

// ============================================================================
// SECTION: Bindings
// ============================================================================

/// Factory producing a fresh investigator per run.
type InvestigatorFactory<R> = Arc<dyn Fn() -> Box<dyn DynInvestigator<R>> + Send + Sync>;

/// Registration of one investigator for request type `R`.
pub struct InvestigatorBinding<R: RuleRequest> {
    /// Investigator identifier.
    id: InvestigatorId,
    /// Investigators that must finish first.
    depends_on: BTreeSet<InvestigatorId>,
    /// Per-run factory.
    factory: InvestigatorFactory<R>,
}

impl<R: RuleRequest> Clone for InvestigatorBinding<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            depends_on: self.depends_on.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<R: RuleRequest> fmt::Debug for InvestigatorBinding<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvestigatorBinding")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

impl<R: RuleRequest> InvestigatorBinding<R> {
    /// Binds an investigator factory under `id`.
    #[must_use]
    pub fn new<I, F>(id: impl Into<InvestigatorId>, factory: F) -> Self
    where
        I: Investigator<R>,
        F: Fn() -> I + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            depends_on: BTreeSet::new(),
            factory: Arc::new(move || -> Box<dyn DynInvestigator<R>> {
                Box::new(Erased {
                    inner: factory(),
                })
            }),
        }
    }

    /// Declares that `dependency` must finish before this investigator starts.
    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<InvestigatorId>) -> Self {
        self.depends_on.insert(dependency.into());
        self
    }

    /// Returns the investigator identifier.
    #[must_use]
    pub const fn id(&self) -> &InvestigatorId {
        &self.id
    }

    /// Returns the declared dependencies.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<InvestigatorId> {
        &self.depends_on
    }

    /// Instantiates and runs the investigator, containing panics.
    pub(crate) fn run(
        &self,
        ctx: &RunContext<R>,
        session: &dyn RuleSession,
        abort: &AtomicBool,
    ) -> Result<(), RuleError> {
        catch_unwind(AssertUnwindSafe(|| {
            let mut investigator = (self.factory)();
            investigator.run(ctx, session, abort)
        }))
        .unwrap_or_else(|_| Err(RuleError::processor(format!("investigator {} panicked", self.id))))
    }
}

// ============================================================================
// SECTION: Dependency Graph
// ============================================================================

/// Maps each binding to the indices of its in-set dependencies.
///
/// Dependencies naming investigators outside the set are ignored.
pub(crate) fn dependency_indices<R: RuleRequest>(
    bindings: &[InvestigatorBinding<R>],
) -> Vec<Vec<usize>> {
    let index: BTreeMap<&InvestigatorId, usize> =
        bindings.iter().enumerate().map(|(position, binding)| (binding.id(), position)).collect();
    bindings
        .iter()
        .map(|binding| {
            binding
                .dependencies()
                .iter()
                .filter_map(|dependency| index.get(dependency).copied())
                .collect()
        })
        .collect()
}

/// Returns a start order honoring dependencies, stable in registration order.
///
/// # Errors
///
/// Returns [`RuleError::DependencyCycle`] naming the investigators that can
/// never become eligible.
pub(crate) fn dependency_order<R: RuleRequest>(
    bindings: &[InvestigatorBinding<R>],
) -> Result<Vec<usize>, RuleError> {
    let dependencies = dependency_indices(bindings);
    let mut done = vec![false; bindings.len()];
    let mut order = Vec::with_capacity(bindings.len());
    while order.len() < bindings.len() {
        let next = (0 .. bindings.len()).find(|&position| {
            !done[position] && dependencies[position].iter().all(|&dep| done[dep])
        });
        let Some(position) = next else {
            let stuck = (0 .. bindings.len())
                .filter(|&position| !done[position])
                .map(|position| bindings[position].id().to_string())
                .collect();
            return Err(RuleError::DependencyCycle(stuck));
        };
        done[position] = true;
        order.push(position);
    }
    Ok(order)
}

/// Validates a binding set: identifiers must be non-blank and unique, and the
/// dependency graph must be acyclic.
///
/// # Errors
///
/// Returns [`RuleError::MissingOptions`] for malformed identifiers and
/// [`RuleError::DependencyCycle`] for cycles.
pub fn validate_bindings<R: RuleRequest>(
    bindings: &[InvestigatorBinding<R>],
) -> Result<(), RuleError> {
    let mut seen = BTreeSet::new();
    for binding in bindings {
        if binding.id().is_blank() {
            return Err(RuleError::MissingOptions(format!(
                "investigator id for request {} is blank",
                R::KIND
            )));
        }
        if !seen.insert(binding.id()) {
            return Err(RuleError::MissingOptions(format!(
                "investigator {} registered twice for request {}",
                binding.id(),
                R::KIND
            )));
        }
    }
    dependency_order(bindings).map(|_| ())
}
