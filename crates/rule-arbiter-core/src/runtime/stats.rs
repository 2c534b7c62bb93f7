// crates/rule-arbiter-core/src/runtime/stats.rs
// ============================================================================
// Module: Rule Arbiter Run Statistics
// Description: Per-run counters, timers, and rule-firing histogram.
// Purpose: Record how long gathering and evaluation took and what they produced.
// Dependencies: serde, crate::runtime::timing
// ============================================================================

//! ## Overview
//! [`RuleStats`] composes two [`TimingTracker`]s: one for rule evaluation,
//! keyed by arbiter name, and one for fact gathering, keyed by fact type.
//! Counts follow the same keys. The rule histogram is merged from session
//! reports after evaluation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::runtime::timing::TimingTracker;

// ============================================================================
// SECTION: Fact Statistics
// ============================================================================

/// Gathering summary for one fact type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactStatistic {
    /// Fact type name.
    pub fact_type: String,
    /// Facts inserted.
    pub count: u64,
    /// Gathering time in milliseconds.
    pub duration_ms: u64,
}

/// Serializable view of [`RuleStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatsSnapshot {
    /// Rules fired per arbiter.
    pub rule_counts: BTreeMap<String, u64>,
    /// Evaluation time per arbiter in milliseconds.
    pub rule_durations_ms: BTreeMap<String, u64>,
    /// Per fact type gathering summaries.
    pub facts: Vec<FactStatistic>,
    /// Cumulative fire counts per rule id.
    pub rule_histogram: BTreeMap<String, u64>,
    /// Wall-clock time with any evaluation open, in milliseconds.
    pub rules_active_ms: u64,
    /// Wall-clock time with any gathering open, in milliseconds.
    pub facts_active_ms: u64,
    /// Wall-clock time from the first gathering start to the last end, in
    /// milliseconds.
    #[serde(default)]
    pub facts_span_ms: u64,
}

// ============================================================================
// SECTION: Rule Stats
// ============================================================================

/// Counters and timers for one run.
#[derive(Debug, Clone, Default)]
pub struct RuleStats {
    /// Evaluation timers keyed by arbiter name.
    rules: TimingTracker,
    /// Gathering timers keyed by fact type.
    facts: TimingTracker,
    /// Rules fired keyed by arbiter name.
    rule_counts: BTreeMap<String, u64>,
    /// Facts inserted keyed by fact type.
    fact_counts: BTreeMap<String, u64>,
    /// Fire counts keyed by rule id.
    histogram: BTreeMap<String, u64>,
}

impl RuleStats {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the evaluation interval for `arbiter`.
    pub fn start_rules(&mut self, arbiter: &str) {
        self.rules.restart(arbiter);
    }

    /// Closes the evaluation interval for `arbiter` and adds `fired` rules.
    pub fn finish_rules(&mut self, arbiter: &str, fired: u64) {
        self.rules.end(arbiter);
        let count = self.rule_counts.entry(arbiter.to_string()).or_default();
        *count = count.saturating_add(fired);
    }

    /// Opens the gathering interval for `fact_type`.
    pub fn start_facts(&mut self, fact_type: &str) {
        self.facts.restart(fact_type);
    }

    /// Closes the gathering interval for `fact_type`.
    pub fn finish_facts(&mut self, fact_type: &str) {
        self.facts.end(fact_type);
    }

    /// Adds `inserted` facts of `fact_type`.
    pub fn add_facts(&mut self, fact_type: &str, inserted: u64) {
        let count = self.fact_counts.entry(fact_type.to_string()).or_default();
        *count = count.saturating_add(inserted);
    }

    /// Merges a session rule histogram into the cumulative counts.
    pub fn merge_histogram(&mut self, histogram: &BTreeMap<String, u64>) {
        for (rule, fired) in histogram {
            let count = self.histogram.entry(rule.clone()).or_default();
            *count = count.saturating_add(*fired);
        }
    }

    /// Returns the evaluation timers.
    #[must_use]
    pub const fn rules(&self) -> &TimingTracker {
        &self.rules
    }

    /// Returns the gathering timers.
    #[must_use]
    pub const fn facts(&self) -> &TimingTracker {
        &self.facts
    }

    /// Returns rules fired by `arbiter`.
    #[must_use]
    pub fn rule_count(&self, arbiter: &str) -> u64 {
        self.rule_counts.get(arbiter).copied().unwrap_or_default()
    }

    /// Returns facts inserted of `fact_type`.
    #[must_use]
    pub fn fact_count(&self, fact_type: &str) -> u64 {
        self.fact_counts.get(fact_type).copied().unwrap_or_default()
    }

    /// Returns the cumulative rule histogram.
    #[must_use]
    pub const fn rule_histogram(&self) -> &BTreeMap<String, u64> {
        &self.histogram
    }

    /// Returns per fact type gathering summaries, ordered by fact type.
    #[must_use]
    pub fn fact_statistics(&self) -> Vec<FactStatistic> {
        let mut names: Vec<&str> = self.fact_counts.keys().map(String::as_str).collect();
        for name in self.facts.names() {
            if !self.fact_counts.contains_key(name) {
                names.push(name);
            }
        }
        names.sort_unstable();
        names
            .into_iter()
            .map(|name| FactStatistic {
                fact_type: name.to_string(),
                count: self.fact_count(name),
                duration_ms: millis(self.facts.elapsed(name).unwrap_or_default()),
            })
            .collect()
    }

    /// Returns a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RuleStatsSnapshot {
        RuleStatsSnapshot {
            rule_counts: self.rule_counts.clone(),
            rule_durations_ms: self
                .rules
                .snapshot()
                .into_iter()
                .map(|(name, elapsed)| (name, millis(elapsed)))
                .collect(),
            facts: self.fact_statistics(),
            rule_histogram: self.histogram.clone(),
            rules_active_ms: millis(self.rules.active()),
            facts_active_ms: millis(self.facts.active()),
            facts_span_ms: millis(self.facts.span()),
        }
    }
}

/// Converts a duration to whole milliseconds, saturating.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Returns the unqualified name of `T`.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
