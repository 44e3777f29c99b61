//! Result aggregation
//!
//! Collects results in completion order and keeps the summary counts current,
//! so a report can be produced the moment the run is finalized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Outcome, TeardownFailure, TestResult};
use crate::utils::Timer;

/// Summary counts for one run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    /// Units with at least one function fixture teardown failure
    pub fixture_teardown_failed: usize,
    /// Session fixtures whose teardown failed
    pub session_teardown_failed: usize,
    /// Units admitted but never dispatched because discovery aborted
    pub abandoned: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    /// No failed and no errored units
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Error: {} | Pass rate: {:.1}% | {}ms",
            self.total,
            self.passed,
            self.failed,
            self.errored,
            self.pass_rate(),
            self.duration_ms
        )?;
        if self.fixture_teardown_failed > 0 || self.session_teardown_failed > 0 {
            write!(
                f,
                " | Teardown errors: {} unit(s), {} session",
                self.fixture_teardown_failed, self.session_teardown_failed
            )?;
        }
        if self.abandoned > 0 {
            write!(f, " | Abandoned: {}", self.abandoned)?;
        }
        Ok(())
    }
}

/// Finalized report of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// Completion order
    pub results: Vec<TestResult>,
    pub session_teardown_failures: Vec<TeardownFailure>,
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Results in submission order
    pub fn by_submission(&self) -> Vec<&TestResult> {
        let mut ordered: Vec<_> = self.results.iter().collect();
        ordered.sort_by_key(|r| r.seq);
        ordered
    }

    /// Failed and errored results, in submission order
    pub fn failures(&self) -> Vec<&TestResult> {
        self.by_submission()
            .into_iter()
            .filter(|r| !r.outcome.is_success())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run started {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in self.by_submission() {
            writeln!(f, "  {result}")?;
        }
        for failure in &self.session_teardown_failures {
            writeln!(f, "  {failure}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        write!(f, "{}", self.summary)
    }
}

/// Incremental accumulator behind [`RunReport`]
#[derive(Debug)]
pub struct ResultAggregator {
    results: Vec<TestResult>,
    summary: RunSummary,
    started_at: DateTime<Utc>,
    timer: Timer,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            summary: RunSummary::default(),
            started_at: Utc::now(),
            timer: Timer::start("run"),
        }
    }

    pub fn record(&mut self, result: TestResult) {
        self.summary.total += 1;
        match result.outcome {
            Outcome::Passed => self.summary.passed += 1,
            Outcome::Failed => self.summary.failed += 1,
            Outcome::Errored => self.summary.errored += 1,
        }
        if !result.teardown_failures.is_empty() {
            self.summary.fixture_teardown_failed += 1;
        }
        self.results.push(result);
    }

    pub fn record_abandoned(&mut self, count: usize) {
        self.summary.abandoned += count;
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Close the report once session teardown has returned
    pub fn finalize(mut self, session_failures: Vec<TeardownFailure>) -> RunReport {
        self.summary.session_teardown_failed = session_failures.len();
        self.summary.duration_ms = self.timer.stop();
        RunReport {
            results: self.results,
            session_teardown_failures: session_failures,
            summary: self.summary,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}
