// crates/rule-arbiter-core/src/runtime/timing.rs
// ============================================================================
// Module: Rule Arbiter Timing Tracker
// Description: Named-interval stopwatch with restart and active-time tracking.
// Purpose: Measure per-processor and per-fact durations inside one run.
// Dependencies: std::time
// ============================================================================

//! ## Overview
//! A [`TimingTracker`] records any number of named intervals. Intervals may
//! nest or overlap; [`TimingTracker::active`] reports the wall-clock time
//! during which at least one interval was open, so nested intervals never
//! double count. [`TimingTracker::span`] reports the wall-clock stretch from
//! the first start to the last end, idle gaps included. Every operation has an `*_at` variant taking an explicit
//! [`Instant`] for deterministic tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Interval
// ============================================================================

/// State of one named interval.
#[derive(Debug, Clone, Copy, Default)]
struct Interval {
    /// Start of the current open span, if running.
    started: Option<Instant>,
    /// Time accumulated by closed spans.
    elapsed: Duration,
}

impl Interval {
    /// Returns accumulated time including the live span at `now`.
    fn elapsed_at(&self, now: Instant) -> Duration {
        self.started.map_or(self.elapsed, |started| {
            self.elapsed + now.saturating_duration_since(started)
        })
    }
}

// ============================================================================
// SECTION: Timing Tracker
// ============================================================================

/// Named-interval stopwatch.
#[derive(Debug, Clone, Default)]
pub struct TimingTracker {
    /// Intervals keyed by name.
    intervals: BTreeMap<String, Interval>,
    /// Names of open intervals in start order.
    open: Vec<String>,
    /// Start of the current active span.
    active_since: Option<Instant>,
    /// Time accumulated by closed active spans.
    active: Duration,
    /// Earliest start of any interval.
    first_start: Option<Instant>,
    /// Latest end of any interval.
    last_end: Option<Instant>,
}

impl TimingTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `name` from zero.
    pub fn start(&mut self, name: &str) {
        self.start_at(name, Instant::now());
    }

    /// Starts `name` from zero at `at`.
    ///
    /// Starting an interval that is already open resets its accumulated time
    /// without touching the active span.
    pub fn start_at(&mut self, name: &str, at: Instant) {
        let interval = self.intervals.entry(name.to_string()).or_default();
        interval.elapsed = Duration::ZERO;
        if interval.started.is_some() {
            interval.started = Some(at);
            return;
        }
        interval.started = Some(at);
        self.open_span(name, at);
    }

    /// Resumes `name`, preserving accumulated time.
    pub fn restart(&mut self, name: &str) {
        self.restart_at(name, Instant::now());
    }

    /// Resumes `name` at `at`, preserving accumulated time.
    ///
    /// Restarting an open interval is a no-op.
    pub fn restart_at(&mut self, name: &str, at: Instant) {
        let interval = self.intervals.entry(name.to_string()).or_default();
        if interval.started.is_some() {
            return;
        }
        interval.started = Some(at);
        self.open_span(name, at);
    }

    /// Ends `name`, returning its accumulated time.
    pub fn end(&mut self, name: &str) -> Option<Duration> {
        self.end_at(name, Instant::now())
    }

    /// Ends `name` at `at`. Returns `None` when the interval is not open.
    pub fn end_at(&mut self, name: &str, at: Instant) -> Option<Duration> {
        let interval = self.intervals.get_mut(name)?;
        let started = interval.started.take()?;
        interval.elapsed += at.saturating_duration_since(started);
        let elapsed = interval.elapsed;
        if let Some(position) = self.open.iter().rposition(|open| open == name) {
            self.open.remove(position);
        }
        if self.open.is_empty()
            && let Some(since) = self.active_since.take()
        {
            self.active += at.saturating_duration_since(since);
        }
        self.last_end = Some(self.last_end.map_or(at, |last| last.max(at)));
        Some(elapsed)
    }

    /// Returns accumulated time for `name`, including any live span.
    #[must_use]
    pub fn elapsed(&self, name: &str) -> Option<Duration> {
        self.elapsed_at(name, Instant::now())
    }

    /// Returns accumulated time for `name` as observed at `now`.
    #[must_use]
    pub fn elapsed_at(&self, name: &str, now: Instant) -> Option<Duration> {
        self.intervals.get(name).map(|interval| interval.elapsed_at(now))
    }

    /// Returns the sum of every interval, each counted independently.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.total_at(Instant::now())
    }

    /// Returns the sum of every interval as observed at `now`.
    #[must_use]
    pub fn total_at(&self, now: Instant) -> Duration {
        self.intervals.values().map(|interval| interval.elapsed_at(now)).sum()
    }

    /// Returns wall-clock time during which at least one interval was open.
    #[must_use]
    pub fn active(&self) -> Duration {
        self.active_at(Instant::now())
    }

    /// Returns active time as observed at `now`.
    #[must_use]
    pub fn active_at(&self, now: Instant) -> Duration {
        self.active_since
            .map_or(self.active, |since| self.active + now.saturating_duration_since(since))
    }

    /// Returns wall-clock time from the first start to the last end.
    ///
    /// Gaps with no open interval count. Returns zero before any start.
    #[must_use]
    pub fn span(&self) -> Duration {
        self.span_at(Instant::now())
    }

    /// Returns the span as observed at `now`; an open interval extends it to
    /// `now`.
    #[must_use]
    pub fn span_at(&self, now: Instant) -> Duration {
        let Some(first) = self.first_start else {
            return Duration::ZERO;
        };
        let last = if self.open.is_empty() { self.last_end.unwrap_or(first) } else { now };
        last.saturating_duration_since(first)
    }

    /// Returns true when `name` is open.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.intervals.get(name).is_some_and(|interval| interval.started.is_some())
    }

    /// Returns every tracked interval name.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.intervals.keys().map(String::as_str)
    }

    /// Returns accumulated time per interval as observed now.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Duration> {
        let now = Instant::now();
        self.intervals
            .iter()
            .map(|(name, interval)| (name.clone(), interval.elapsed_at(now)))
            .collect()
    }

    /// Records a newly opened interval, opening the active span if needed.
    fn open_span(&mut self, name: &str, at: Instant) {
        self.first_start = Some(self.first_start.map_or(at, |first| first.min(at)));
        if self.open.is_empty() {
            self.active_since = Some(at);
        }
        self.open.push(name.to_string());
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
