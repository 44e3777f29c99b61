//! Test result models
//!
//! Defines per-unit outcomes, failure payloads, and teardown failures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal classification of one executed unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Errored,
}

impl Outcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Passed => "✓",
            Outcome::Failed => "✗",
            Outcome::Errored => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "PASS"),
            Outcome::Failed => write!(f, "FAIL"),
            Outcome::Errored => write!(f, "ERROR"),
        }
    }
}

/// Failure taxonomy attached to non-passing results
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Assertion,
    UnexpectedException,
    FixtureSetupError,
    FixtureTeardownError,
    Timeout,
}

impl FailureKind {
    pub fn name(&self) -> &'static str {
        match self {
            FailureKind::Assertion => "assertion",
            FailureKind::UnexpectedException => "unexpected_exception",
            FailureKind::FixtureSetupError => "fixture_setup_error",
            FailureKind::FixtureTeardownError => "fixture_teardown_error",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured failure payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Fixture involved, for setup and teardown failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<String>,
    /// Truncated cause chain of the signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            actual: None,
            expected: None,
            fixture: None,
            origin: None,
        }
    }

    pub fn with_values(mut self, actual: Option<String>, expected: Option<String>) -> Self {
        self.actual = actual;
        self.expected = expected;
        self
    }

    pub fn with_fixture(mut self, fixture: impl Into<String>) -> Self {
        self.fixture = Some(fixture.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// A fixture whose teardown half failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownFailure {
    pub fixture: String,
    pub message: String,
}

impl TeardownFailure {
    pub fn new(fixture: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fixture: fixture.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown of '{}' failed: {}", self.fixture, self.message)
    }
}

/// Output written by a unit through its capture sinks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Result of a single unit execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    /// Submission order, stable across runs with the same definition order
    pub seq: u64,
    pub outcome: Outcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    /// Function fixture teardown errors, reported as secondary detail
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown_failures: Vec<TeardownFailure>,
    #[serde(default)]
    pub output: CapturedOutput,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<String>,
}

impl TestResult {
    pub fn passed(id: impl Into<String>, seq: u64, duration_ms: u64) -> Self {
        Self {
            id: id.into(),
            seq,
            outcome: Outcome::Passed,
            duration_ms,
            failure: None,
            teardown_failures: Vec::new(),
            output: CapturedOutput::default(),
            markers: Vec::new(),
        }
    }

    pub fn failed(id: impl Into<String>, seq: u64, duration_ms: u64, failure: FailureDetail) -> Self {
        Self {
            outcome: Outcome::Failed,
            failure: Some(failure),
            ..Self::passed(id, seq, duration_ms)
        }
    }

    pub fn errored(
        id: impl Into<String>,
        seq: u64,
        duration_ms: u64,
        failure: FailureDetail,
    ) -> Self {
        Self {
            outcome: Outcome::Errored,
            failure: Some(failure),
            ..Self::passed(id, seq, duration_ms)
        }
    }

    pub fn with_teardown_failures(mut self, failures: Vec<TeardownFailure>) -> Self {
        self.teardown_failures = failures;
        self
    }

    pub fn with_output(mut self, output: CapturedOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.outcome.symbol(),
            self.id,
            self.duration_ms
        )?;
        if let Some(failure) = &self.failure {
            write!(f, " - {failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Passed.to_string(), "PASS");
        assert_eq!(Outcome::Errored.to_string(), "ERROR");
        assert!(Outcome::Passed.is_success());
        assert!(!Outcome::Failed.is_success());
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::FixtureSetupError).unwrap();
        assert_eq!(json, "\"fixture_setup_error\"");
        assert_eq!(FailureKind::UnexpectedException.name(), "unexpected_exception");
    }

    #[test]
    fn test_result_creation() {
        let result = TestResult::passed("tests/math::test_add", 0, 12);
        assert!(result.outcome.is_success());
        assert_eq!(result.failure_kind(), None);

        let failure = FailureDetail::new(FailureKind::Assertion, "1 != 2")
            .with_values(Some("1".into()), Some("2".into()));
        let result = TestResult::failed("tests/math::test_sub", 1, 3, failure);
        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.failure_kind(), Some(FailureKind::Assertion));
        assert_eq!(
            result.to_string(),
            "✗ tests/math::test_sub [3ms] - [assertion] 1 != 2"
        );
    }

    #[test]
    fn test_result_json_skips_empty_fields() {
        let result = TestResult::passed("a::b", 4, 1);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["outcome"], "passed");
        assert!(value.get("failure").is_none());
        assert!(value.get("teardown_failures").is_none());
    }
}
