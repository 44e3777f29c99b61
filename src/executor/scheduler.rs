//! Producer/consumer scheduler
//!
//! Discovery submits definitions through a [`Submitter`]; they are filtered,
//! expanded and pushed onto a bounded queue. A dispatcher task pulls units
//! only while a slot is free, so a fast producer blocks on the full queue.
//! Once the producer is done and every slot has drained, session fixtures are
//! torn down and the report is finalized.

use anyhow::Context;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::aggregate::{ResultAggregator, RunReport};
use super::unit::UnitExecutor;
use crate::config::RunConfig;
use crate::error::DiscoveryError;
use crate::fixtures::FixtureRegistry;
use crate::models::{FailureDetail, FailureKind, TestDefinition, TestResult, TestUnit};
use crate::params::{expand, Selection};
use crate::utils::panic_message;

/// Lifecycle of one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Finalized,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Draining => write!(f, "draining"),
            RunState::Finalized => write!(f, "finalized"),
        }
    }
}

/// Report plus the discovery errors raised while producing it
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub discovery_errors: Vec<DiscoveryError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.discovery_errors.is_empty() && self.report.is_success()
    }
}

/// Run configuration and entry point
pub struct Scheduler {
    concurrency: usize,
    queue_capacity: usize,
    executor: UnitExecutor,
    selection: Selection,
    stream: Option<mpsc::UnboundedSender<TestResult>>,
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            concurrency,
            queue_capacity: concurrency * 2,
            executor: UnitExecutor::new(Arc::new(FixtureRegistry::new())),
            selection: Selection::all(),
            stream: None,
        }
    }

    /// Build from a validated config; selectors are parsed here
    pub fn from_config(config: &RunConfig) -> Result<Self, DiscoveryError> {
        let selection = Selection::parse(&config.selectors)?.with_marker(config.marker.clone());
        Ok(Self::new(config.concurrency)
            .with_queue_capacity(config.queue_capacity)
            .with_timeout(config.timeout())
            .with_capture(config.capture_output)
            .with_selection(selection))
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.executor = self.executor.with_timeout(timeout);
        self
    }

    pub fn with_capture(mut self, enabled: bool) -> Self {
        self.executor = self.executor.with_capture(enabled);
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Feed of results as they complete, for incremental rendering
    pub fn stream_results(&mut self) -> mpsc::UnboundedReceiver<TestResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.stream = Some(tx);
        rx
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Spawn the dispatcher; must be called inside a tokio runtime
    pub fn start(self) -> (Submitter, RunHandle) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let errors = Arc::new(Mutex::new(Vec::new()));

        info!(
            "Starting run (concurrency {}, queue capacity {})",
            self.concurrency, self.queue_capacity
        );

        let dispatcher = Dispatcher {
            rx,
            aborts: abort_rx,
            executor: Arc::new(self.executor),
            concurrency: self.concurrency,
            state: state_tx,
            errors: errors.clone(),
            stream: self.stream,
        };
        let task = tokio::spawn(dispatcher.run());

        let submitter = Submitter {
            tx,
            abort: abort_tx,
            selection: Arc::new(self.selection),
            seen: HashSet::new(),
            next_seq: 0,
            errors: errors.clone(),
        };
        let handle = RunHandle {
            state: state_rx,
            task,
            errors,
        };
        (submitter, handle)
    }

    /// Submit every definition, close discovery and wait for the report
    pub async fn run<I>(self, definitions: I) -> anyhow::Result<RunOutcome>
    where
        I: IntoIterator<Item = TestDefinition>,
    {
        let (mut submitter, handle) = self.start();
        submitter.submit_all(definitions).await;
        submitter.finish();
        handle.wait().await
    }
}

/// Producer side of the queue
pub struct Submitter {
    tx: mpsc::Sender<TestUnit>,
    abort: mpsc::UnboundedSender<String>,
    selection: Arc<Selection>,
    seen: HashSet<String>,
    next_seq: u64,
    errors: Arc<Mutex<Vec<DiscoveryError>>>,
}

impl Submitter {
    /// Filter, expand and enqueue one definition
    ///
    /// Waits while the queue is full. Returns the number of admitted units.
    /// Errors are also kept for the final outcome.
    pub async fn submit(&mut self, definition: TestDefinition) -> Result<usize, DiscoveryError> {
        let base = definition.base_id();
        if !self.seen.insert(base.clone()) {
            return Err(self.reject(DiscoveryError::DuplicateTest { test: base }));
        }

        let selection = self.selection.clone();
        if !selection.admits_definition(&definition) {
            debug!(test = %base, "not selected");
            return Ok(0);
        }

        let units = expand(&Arc::new(definition)).map_err(|err| self.reject(err))?;

        let mut admitted = 0;
        for mut unit in units.into_iter().filter(|u| selection.admits_unit(u)) {
            unit.seq = self.next_seq;
            self.next_seq += 1;
            if self.tx.send(unit).await.is_err() {
                return Err(self.reject(DiscoveryError::SchedulerClosed { test: base.clone() }));
            }
            admitted += 1;
        }

        debug!(test = %base, admitted, "definition submitted");
        Ok(admitted)
    }

    /// Submit each definition; a failing one does not stop the rest
    pub async fn submit_all<I>(&mut self, definitions: I) -> usize
    where
        I: IntoIterator<Item = TestDefinition>,
    {
        let mut admitted = 0;
        for definition in definitions {
            match self.submit(definition).await {
                Ok(count) => admitted += count,
                Err(DiscoveryError::SchedulerClosed { .. }) => break,
                Err(_) => {}
            }
        }
        admitted
    }

    /// Unrecoverable discovery error: stop admitting, let in-flight units finish
    ///
    /// Takes effect ahead of any units still queued.
    pub fn abort(self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Aborting discovery: {}", reason);
        if self.abort.send(reason.clone()).is_err() {
            self.errors.lock().push(DiscoveryError::Aborted { reason });
        }
    }

    /// Signal end of discovery
    pub fn finish(self) {
        debug!(units = self.next_seq, "discovery finished");
    }

    /// Units admitted so far
    pub fn admitted(&self) -> u64 {
        self.next_seq
    }

    fn reject(&self, err: DiscoveryError) -> DiscoveryError {
        warn!("{}", err);
        self.errors.lock().push(err.clone());
        err
    }
}

/// Consumer side: observe and await the run
pub struct RunHandle {
    state: watch::Receiver<RunState>,
    task: JoinHandle<RunReport>,
    errors: Arc<Mutex<Vec<DiscoveryError>>>,
}

impl RunHandle {
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Wait until the run has reached `target` or a later state
    pub async fn reached(&mut self, target: RunState) -> RunState {
        loop {
            let current = *self.state.borrow_and_update();
            if current >= target {
                return current;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow();
            }
        }
    }

    pub async fn wait(self) -> anyhow::Result<RunOutcome> {
        let report = self.task.await.context("scheduler task failed")?;
        let discovery_errors = self.errors.lock().clone();
        Ok(RunOutcome {
            report,
            discovery_errors,
        })
    }
}

struct Dispatcher {
    rx: mpsc::Receiver<TestUnit>,
    aborts: mpsc::UnboundedReceiver<String>,
    executor: Arc<UnitExecutor>,
    concurrency: usize,
    state: watch::Sender<RunState>,
    errors: Arc<Mutex<Vec<DiscoveryError>>>,
    stream: Option<mpsc::UnboundedSender<TestResult>>,
}

impl Dispatcher {
    async fn run(mut self) -> RunReport {
        let mut aggregator = ResultAggregator::new();
        let mut in_flight: JoinSet<TestResult> = JoinSet::new();
        let mut admitting = true;
        let mut abort_open = true;

        loop {
            tokio::select! {
                biased;

                signal = self.aborts.recv(), if admitting && abort_open => match signal {
                    Some(reason) => {
                        admitting = false;
                        let abandoned = self.close_queue();
                        warn!("Discovery aborted: {} ({} queued unit(s) abandoned)", reason, abandoned);
                        aggregator.record_abandoned(abandoned);
                        self.errors.lock().push(DiscoveryError::Aborted { reason });
                        self.transition(RunState::Draining);
                    }
                    None => abort_open = false,
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => match joined {
                    Ok(result) => self.emit(&mut aggregator, result),
                    Err(err) => error!("unit task failed: {}", err),
                },
                admission = self.rx.recv(), if admitting && in_flight.len() < self.concurrency => match admission {
                    Some(unit) => {
                        if self.current() == RunState::Idle {
                            self.transition(RunState::Running);
                        }
                        self.dispatch(&mut in_flight, unit);
                    }
                    None => {
                        admitting = false;
                        self.transition(RunState::Draining);
                    }
                },
                else => break,
            }
        }

        if self.current() != RunState::Draining {
            self.transition(RunState::Draining);
        }

        let session_failures = self.executor.registry().teardown_all_sessions().await;
        let report = aggregator.finalize(session_failures);
        self.transition(RunState::Finalized);

        info!("Run finished: {}", report.summary);
        report
    }

    fn dispatch(&self, in_flight: &mut JoinSet<TestResult>, unit: TestUnit) {
        let executor = self.executor.clone();
        in_flight.spawn(async move {
            let id = unit.id.clone();
            let seq = unit.seq;
            match AssertUnwindSafe(executor.run(unit)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let message = format!("executor panicked: {}", panic_message(payload.as_ref()));
                    error!(unit = %id, "{}", message);
                    TestResult::errored(id, seq, 0, FailureDetail::new(FailureKind::UnexpectedException, message))
                }
            }
        });
    }

    fn emit(&self, aggregator: &mut ResultAggregator, result: TestResult) {
        debug!("{}", result);
        if let Some(stream) = &self.stream {
            let _ = stream.send(result.clone());
        }
        aggregator.record(result);
    }

    /// Refuse further admissions and count what was still queued
    fn close_queue(&mut self) -> usize {
        self.rx.close();
        let mut abandoned = 0;
        while let Ok(unit) = self.rx.try_recv() {
            debug!(unit = %unit.id, "abandoned");
            abandoned += 1;
        }
        abandoned
    }

    fn current(&self) -> RunState {
        *self.state.borrow()
    }

    fn transition(&self, next: RunState) {
        let previous = self.state.send_replace(next);
        info!("Run state: {} -> {}", previous, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::fail;
    use crate::fixtures::{Fixture, Resource};
    use crate::models::{Outcome, ParamList};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    fn passing(name: &str) -> TestDefinition {
        TestDefinition::asynchronous("t.rs", name, |_, _| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_run_reports_every_unit() {
        let definitions = vec![
            passing("test_a"),
            TestDefinition::asynchronous("t.rs", "test_b", |_, _| async {
                fail("nope")?;
                Ok(())
            }),
            passing("test_c")
                .args(["n"])
                .param(ParamList::values([1, 2, 3])),
        ];

        let outcome = Scheduler::new(2).run(definitions).await.unwrap();
        let summary = &outcome.report.summary;
        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 4);
        assert_eq!(summary.failed, 1);
        assert!(outcome.discovery_errors.is_empty());

        let ids: Vec<_> = outcome.report.by_submission().iter().map(|r| r.id.clone()).collect();
        assert_eq!(
            ids,
            vec!["t.rs::test_a", "t.rs::test_b", "t.rs::test_c[1]", "t.rs::test_c[2]", "t.rs::test_c[3]"]
        );
    }

    #[tokio::test]
    async fn test_state_machine_reaches_finalized() {
        let (mut submitter, mut handle) = Scheduler::new(1).start();
        assert_eq!(handle.state(), RunState::Idle);

        submitter.submit(passing("test_one")).await.unwrap();
        assert!(handle.reached(RunState::Running).await >= RunState::Running);
        submitter.finish();

        assert_eq!(handle.reached(RunState::Finalized).await, RunState::Finalized);
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.report.summary.passed, 1);
    }

    #[tokio::test]
    async fn test_discovery_errors_do_not_stop_other_definitions() {
        let definitions = vec![
            passing("test_dup"),
            passing("test_dup"),
            passing("test_bad").param(ParamList::values([1])),
            passing("test_fine"),
        ];
        let outcome = Scheduler::new(4).run(definitions).await.unwrap();

        assert_eq!(outcome.report.summary.total, 2);
        assert_eq!(outcome.discovery_errors.len(), 2);
        assert!(matches!(outcome.discovery_errors[0], DiscoveryError::DuplicateTest { .. }));
        assert!(matches!(outcome.discovery_errors[1], DiscoveryError::ArityMismatch { .. }));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_selection_filters_before_expansion() {
        let selection = Selection::parse(["t.rs::test_c[2]"]).unwrap();
        let definitions = vec![
            passing("test_a"),
            passing("test_c").args(["n"]).param(ParamList::values([1, 2, 3])),
        ];
        let outcome = Scheduler::new(2)
            .with_selection(selection)
            .run(definitions)
            .await
            .unwrap();
        let ids: Vec<_> = outcome.report.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t.rs::test_c[2]"]);
    }

    #[tokio::test]
    async fn test_pool_never_exceeds_concurrency() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (live_c, peak_c) = (live.clone(), peak.clone());
        let def = TestDefinition::asynchronous("t.rs", "test_busy", move |_, _| {
            let live = live_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .args(["i"])
        .param(ParamList::values(0..24));

        let outcome = Scheduler::new(3).run(vec![def]).await.unwrap();
        assert_eq!(outcome.report.summary.passed, 24);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_abort_lets_in_flight_finish_and_abandons_queue() {
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let (gate_c, started_c) = (gate.clone(), started.clone());
        let def = TestDefinition::asynchronous("t.rs", "test_gated", move |_, _| {
            let gate = gate_c.clone();
            let started = started_c.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                let _permit = gate.acquire().await?;
                Ok(())
            }
        })
        .args(["i"])
        .param(ParamList::values(0..3));

        let (mut submitter, mut handle) = Scheduler::new(1).with_queue_capacity(4).start();
        assert_eq!(submitter.submit(def).await.unwrap(), 3);
        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        submitter.abort("collection failed");
        gate.add_permits(10);

        handle.reached(RunState::Finalized).await;
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.report.summary.passed, 1);
        assert_eq!(outcome.report.summary.abandoned, 2);
        assert_eq!(
            outcome.discovery_errors,
            vec![DiscoveryError::Aborted { reason: "collection failed".into() }]
        );
    }

    #[tokio::test]
    async fn test_session_teardown_happens_after_drain() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let counter = torn_down.clone();
        let shared = Fixture::session("svc", move || {
            let counter = counter.clone();
            async move {
                Ok(Resource::new(1u8).with_teardown(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
            }
        });
        let observed = torn_down.clone();
        let def = TestDefinition::asynchronous("t.rs", "test_uses_svc", move |ctx, _| {
            let shared = shared.clone();
            let observed = observed.clone();
            async move {
                ctx.fixture::<u8>(&shared).await?;
                assert_eq!(observed.load(Ordering::SeqCst), 0);
                Ok(())
            }
        })
        .args(["i"])
        .param(ParamList::values(0..10));

        let mut scheduler = Scheduler::new(4);
        let mut stream = scheduler.stream_results();
        let outcome = scheduler.run(vec![def]).await.unwrap();

        assert_eq!(outcome.report.summary.passed, 10);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);

        let mut streamed = 0;
        while let Ok(result) = stream.try_recv() {
            assert_eq!(result.outcome, Outcome::Passed);
            streamed += 1;
        }
        assert_eq!(streamed, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocking_and_async_bodies_share_session_fixture_concurrently() {
        let setups = Arc::new(AtomicUsize::new(0));
        let counter = setups.clone();
        let shared = Fixture::session("shared", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Resource::new(7u32))
            }
        });
        let pause = Duration::from_millis(300);

        let blocking = {
            let shared = shared.clone();
            TestDefinition::blocking("t.rs", "test_blocking_lane", move |ctx, _| {
                let value = ctx.blocking_fixture::<u32>(&shared)?;
                std::thread::sleep(pause);
                crate::assertions::assert_equal(*value, 7)?;
                Ok(())
            })
            .args(["i"])
            .param(ParamList::values(0..4))
        };
        let asynchronous = TestDefinition::asynchronous("t.rs", "test_async_lane", move |ctx, _| {
            let shared = shared.clone();
            async move {
                let value = ctx.fixture::<u32>(&shared).await?;
                tokio::time::sleep(pause).await;
                crate::assertions::assert_equal(*value, 7)?;
                Ok(())
            }
        })
        .args(["i"])
        .param(ParamList::values(0..4));

        let started = std::time::Instant::now();
        let outcome = Scheduler::new(8).run(vec![blocking, asynchronous]).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome.report.summary.total, 8);
        assert_eq!(outcome.report.summary.passed, 8);
        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert!(elapsed < pause * 3, "lanes serialized: {elapsed:?}");
    }
}
