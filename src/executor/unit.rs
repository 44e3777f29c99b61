//! Unit executor
//!
//! Runs one expanded unit to a [`TestResult`]. Every exit path of the body
//! (return, assertion, error, panic, timeout) goes through the same tail:
//! the context tears down its function fixtures, capture is restored, and
//! the outcome is classified.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::assertions::AssertionFailure;
use crate::error::FixtureError;
use crate::fixtures::{FixtureRegistry, OutputCapture, TestContext};
use crate::models::{FailureDetail, FailureKind, Outcome, TeardownFailure, TestBody, TestResult, TestUnit};
use crate::utils::{panic_message, truncate, Timer, MAX_DETAIL_LEN};

/// How the body ended, before classification
enum BodyOutcome {
    Returned(anyhow::Result<()>),
    Panicked(String),
    TimedOut(Duration),
}

/// Executes single units against a shared fixture registry
#[derive(Clone)]
pub struct UnitExecutor {
    registry: Arc<FixtureRegistry>,
    timeout: Option<Duration>,
    capture_output: bool,
}

impl UnitExecutor {
    pub fn new(registry: Arc<FixtureRegistry>) -> Self {
        Self {
            registry,
            timeout: None,
            capture_output: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_capture(mut self, enabled: bool) -> Self {
        self.capture_output = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<FixtureRegistry> {
        &self.registry
    }

    /// Run a unit; never fails, every error becomes part of the result
    pub async fn run(&self, unit: TestUnit) -> TestResult {
        debug!(unit = %unit.id, seq = unit.seq, "starting unit");

        let ctx = TestContext::new(
            unit.id.clone(),
            self.registry.clone(),
            OutputCapture::new(self.capture_output),
        );

        let timer = Timer::start(unit.id.clone());
        let outcome = self.invoke(&unit, &ctx).await;
        let teardown_failures = ctx.finish().await;
        let output = ctx.restore_output();

        let mut result = classify(&unit, outcome, &teardown_failures)
            .with_teardown_failures(teardown_failures)
            .with_output(output)
            .with_markers(unit.definition.markers().to_vec());
        result.duration_ms = timer.stop();

        debug!(unit = %unit.id, outcome = %result.outcome, "finished unit");
        result
    }

    async fn invoke(&self, unit: &TestUnit, ctx: &TestContext) -> BodyOutcome {
        let args = unit.args();
        let running: BoxFuture<'static, BodyOutcome> = match unit.definition.body() {
            TestBody::Async(body) => {
                let body = body.clone();
                let ctx = ctx.clone();
                let call = async move { body(ctx, args).await };
                async move {
                    match AssertUnwindSafe(call).catch_unwind().await {
                        Ok(result) => BodyOutcome::Returned(result),
                        Err(payload) => BodyOutcome::Panicked(panic_message(payload.as_ref())),
                    }
                }
                .boxed()
            }
            TestBody::Blocking(body) => {
                let body = body.clone();
                let ctx = ctx.clone();
                async move {
                    match tokio::task::spawn_blocking(move || body(ctx, args)).await {
                        Ok(result) => BodyOutcome::Returned(result),
                        Err(err) if err.is_panic() => {
                            BodyOutcome::Panicked(panic_message(err.into_panic().as_ref()))
                        }
                        Err(err) => BodyOutcome::Returned(Err(anyhow::Error::new(err))),
                    }
                }
                .boxed()
            }
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, running)
                .await
                .unwrap_or(BodyOutcome::TimedOut(limit)),
            None => running.await,
        }
    }
}

fn classify(unit: &TestUnit, outcome: BodyOutcome, teardown_failures: &[TeardownFailure]) -> TestResult {
    let (outcome, detail) = match outcome {
        BodyOutcome::Returned(Ok(())) => match teardown_failures.first() {
            None => return TestResult::passed(unit.id.as_str(), unit.seq, 0),
            Some(first) => (
                Outcome::Failed,
                FailureDetail::new(FailureKind::FixtureTeardownError, first.message.as_str())
                    .with_fixture(first.fixture.as_str()),
            ),
        },
        BodyOutcome::Returned(Err(err)) => describe_error(&err),
        BodyOutcome::Panicked(message) => (
            Outcome::Errored,
            FailureDetail::new(FailureKind::UnexpectedException, format!("panicked: {message}"))
                .with_origin("panic"),
        ),
        BodyOutcome::TimedOut(limit) => (
            Outcome::Errored,
            FailureDetail::new(
                FailureKind::Timeout,
                format!("did not finish within {}ms", limit.as_millis()),
            ),
        ),
    };

    match outcome {
        Outcome::Failed => TestResult::failed(unit.id.as_str(), unit.seq, 0, detail),
        _ => TestResult::errored(unit.id.as_str(), unit.seq, 0, detail),
    }
}

fn describe_error(err: &anyhow::Error) -> (Outcome, FailureDetail) {
    if let Some(assertion) = err.chain().find_map(|e| e.downcast_ref::<AssertionFailure>()) {
        return (
            Outcome::Failed,
            FailureDetail::new(FailureKind::Assertion, truncate(&assertion.message, MAX_DETAIL_LEN))
                .with_values(assertion.actual.clone(), assertion.expected.clone()),
        );
    }

    if let Some(FixtureError::Setup { fixture, cause }) =
        err.chain().find_map(|e| e.downcast_ref::<FixtureError>())
    {
        return (
            Outcome::Errored,
            FailureDetail::new(FailureKind::FixtureSetupError, truncate(&cause.to_string(), MAX_DETAIL_LEN))
                .with_fixture(fixture.as_str()),
        );
    }

    let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
    (
        Outcome::Errored,
        FailureDetail::new(FailureKind::UnexpectedException, truncate(&err.to_string(), MAX_DETAIL_LEN))
            .with_origin(truncate(&chain.join(" <- "), MAX_DETAIL_LEN)),
    )
}
