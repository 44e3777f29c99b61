//! Execution context
//!
//! One context per executing unit. It tracks the function-scoped fixtures the
//! unit opened, in acquisition order, and tears them down in reverse when the
//! unit finishes. Session fixtures are delegated to the shared registry.

use parking_lot::Mutex;
use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::capture::{CaptureWriter, OutputCapture};
use super::registry::FixtureRegistry;
use super::resource::{Fixture, Scope, Teardown};
use crate::error::FixtureError;
use crate::models::{CapturedOutput, TeardownFailure, Value};

struct ContextInner {
    unit: String,
    registry: Arc<FixtureRegistry>,
    stack: Mutex<Vec<Teardown>>,
    capture: OutputCapture,
    runtime: Option<Handle>,
    finished: AtomicBool,
}

/// Handle a test body uses to reach fixtures and captured output
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<ContextInner>,
}

impl TestContext {
    pub fn new(unit: impl Into<String>, registry: Arc<FixtureRegistry>, capture: OutputCapture) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                unit: unit.into(),
                registry,
                stack: Mutex::new(Vec::new()),
                capture,
                runtime: Handle::try_current().ok(),
                finished: AtomicBool::new(false),
            }),
        }
    }

    pub fn unit_id(&self) -> &str {
        &self.inner.unit
    }

    /// Resolve a fixture by its scope and downcast its value
    pub async fn fixture<T: Any + Send + Sync>(&self, fixture: &Fixture) -> anyhow::Result<Arc<T>> {
        let value = match fixture.scope() {
            Scope::Function => self.acquire_function_fixture(fixture).await?,
            Scope::Session => self.acquire_session_fixture(fixture).await?,
        };
        value.downcast::<T>().map_err(|_| {
            FixtureError::TypeMismatch {
                fixture: fixture.id().clone(),
                expected: type_name::<T>(),
            }
            .into()
        })
    }

    /// Run setup fresh and register the teardown with this unit
    pub async fn acquire_function_fixture(&self, fixture: &Fixture) -> Result<Value, FixtureError> {
        self.ensure_open(fixture)?;
        let (value, teardown) = fixture.open().await.map_err(|cause| FixtureError::Setup {
            fixture: fixture.id().clone(),
            cause: Arc::new(cause),
        })?;
        self.adopt(teardown).await?;
        debug!(unit = %self.inner.unit, fixture = %fixture.id(), "function fixture ready");
        Ok(value)
    }

    /// Fetch from the shared registry, setting up on first use
    pub async fn acquire_session_fixture(&self, fixture: &Fixture) -> Result<Value, FixtureError> {
        self.ensure_open(fixture)?;
        let handle = self.inner.registry.acquire(fixture).await?;
        if let Some(teardown) = handle.teardown {
            self.adopt(teardown).await?;
        }
        Ok(handle.value)
    }

    /// [`TestContext::fixture`] for blocking bodies
    pub fn blocking_fixture<T: Any + Send + Sync>(&self, fixture: &Fixture) -> anyhow::Result<Arc<T>> {
        self.block_on(self.fixture::<T>(fixture))?
    }

    /// Drive a future to completion from a blocking body
    pub fn block_on<F: Future>(&self, future: F) -> anyhow::Result<F::Output> {
        let runtime = self
            .inner
            .runtime
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("context for {} has no runtime", self.inner.unit))?;
        Ok(runtime.block_on(future))
    }

    pub fn stdout(&self) -> CaptureWriter {
        self.inner.capture.stdout()
    }

    pub fn stderr(&self) -> CaptureWriter {
        self.inner.capture.stderr()
    }

    /// Function fixtures currently awaiting teardown
    pub fn open_fixtures(&self) -> usize {
        self.inner.stack.lock().len()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    pub(crate) fn restore_output(&self) -> CapturedOutput {
        self.inner.capture.restore()
    }

    /// Tear down this unit's function fixtures in reverse acquisition order
    ///
    /// Runs once; later acquisitions on this context are refused.
    pub(crate) async fn finish(&self) -> Vec<TeardownFailure> {
        let mut stack = {
            let mut guard = self.inner.stack.lock();
            if self.inner.finished.swap(true, Ordering::AcqRel) {
                return Vec::new();
            }
            std::mem::take(&mut *guard)
        };

        let mut failures = Vec::new();
        while let Some(mut teardown) = stack.pop() {
            debug!(unit = %self.inner.unit, fixture = %teardown.fixture(), "tearing down function fixture");
            if let Err(failure) = teardown.close().await {
                warn!(unit = %self.inner.unit, "{}", failure);
                failures.push(failure);
            }
        }
        failures
    }

    fn ensure_open(&self, fixture: &Fixture) -> Result<(), FixtureError> {
        if self.is_finished() {
            return Err(FixtureError::ContextFinished(fixture.id().clone()));
        }
        Ok(())
    }

    /// Push a teardown, or close it at once if the unit already finished
    async fn adopt(&self, mut teardown: Teardown) -> Result<(), FixtureError> {
        {
            let mut stack = self.inner.stack.lock();
            if !self.inner.finished.load(Ordering::Acquire) {
                stack.push(teardown);
                return Ok(());
            }
        }
        let fixture = teardown.fixture().clone();
        if let Err(failure) = teardown.close().await {
            warn!(unit = %self.inner.unit, "late {}", failure);
        }
        Err(FixtureError::ContextFinished(fixture))
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("unit", &self.inner.unit)
            .field("open_fixtures", &self.open_fixtures())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Resource;

    fn logged(id: &str, log: Arc<Mutex<Vec<String>>>) -> Fixture {
        let name = id.to_string();
        Fixture::function(id, move || {
            let log = log.clone();
            let name = name.clone();
            async move {
                log.lock().push(format!("setup {name}"));
                Ok(Resource::new(name.len()).with_teardown(move || async move {
                    log.lock().push(format!("teardown {name}"));
                    Ok(())
                }))
            }
        })
    }

    fn context() -> TestContext {
        TestContext::new("t.rs::test_ctx", Arc::new(FixtureRegistry::new()), OutputCapture::new(true))
    }

    #[tokio::test]
    async fn test_function_fixtures_close_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = context();

        let a: Arc<usize> = ctx.fixture(&logged("a", log.clone())).await.unwrap();
        ctx.fixture::<usize>(&logged("bb", log.clone())).await.unwrap();
        assert_eq!(*a, 1);
        assert_eq!(ctx.open_fixtures(), 2);

        assert!(ctx.finish().await.is_empty());
        assert_eq!(
            *log.lock(),
            vec!["setup a", "setup bb", "teardown bb", "teardown a"]
        );
        assert!(ctx.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_setup_leaves_earlier_fixtures_for_teardown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = context();
        let broken = Fixture::function("broken", || async {
            Err::<Resource, _>(anyhow::anyhow!("refused"))
        });

        ctx.fixture::<usize>(&logged("first", log.clone())).await.unwrap();
        let err = ctx.fixture::<usize>(&broken).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FixtureError>(),
            Some(FixtureError::Setup { .. })
        ));

        ctx.finish().await;
        assert_eq!(*log.lock(), vec!["setup first", "teardown first"]);
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let ctx = context();
        let fixture = Fixture::function("text", || async { Ok(Resource::new("x".to_string())) });
        let err = ctx.fixture::<u64>(&fixture).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FixtureError>(),
            Some(FixtureError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_acquire_after_finish_is_refused() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = context();
        ctx.finish().await;

        let err = ctx.acquire_function_fixture(&logged("late", log.clone())).await.unwrap_err();
        assert!(matches!(err, FixtureError::ContextFinished(_)));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_session_fixture_goes_through_registry() {
        let registry = Arc::new(FixtureRegistry::new());
        let shared = Fixture::session("config", || async { Ok(Resource::new(5u16)) });
        let one = TestContext::new("a", registry.clone(), OutputCapture::new(false));
        let two = TestContext::new("b", registry.clone(), OutputCapture::new(false));

        let x = one.fixture::<u16>(&shared).await.unwrap();
        let y = two.fixture::<u16>(&shared).await.unwrap();
        assert!(Arc::ptr_eq(&x, &y));
        assert_eq!(one.open_fixtures(), 0);
        assert_eq!(registry.live_sessions(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_fixture_from_worker_thread() {
        let ctx = context();
        let fixture = Fixture::function("n", || async { Ok(Resource::new(9i32)) });
        let worker = ctx.clone();
        let value = tokio::task::spawn_blocking(move || worker.blocking_fixture::<i32>(&fixture))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*value, 9);
        assert_eq!(ctx.open_fixtures(), 1);
    }

    #[tokio::test]
    async fn test_output_goes_to_capture() {
        use std::io::Write;
        let ctx = context();
        writeln!(ctx.stdout(), "visible").unwrap();
        assert_eq!(ctx.restore_output().stdout, "visible\n");
    }
}
