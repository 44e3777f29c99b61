//! Two-phase fixture resources
//!
//! A fixture's setup yields a [`Resource`]: the value handed to tests and an
//! optional teardown closure. Opening a fixture splits the resource into the
//! shared value and a [`Teardown`] guard whose closer runs at most once.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::models::{TeardownFailure, Value};
use crate::utils::{panic_message, truncate, MAX_DETAIL_LEN};

/// Stable identifier of a fixture factory; session cache key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixtureId(String);

impl FixtureId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FixtureId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FixtureId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifetime of a fixture instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Function,
    Session,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Function => write!(f, "function"),
            Scope::Session => write!(f, "session"),
        }
    }
}

type Closer = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;
type SetupFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Resource>> + Send + Sync>;

/// What a fixture's setup produces
pub struct Resource {
    value: Value,
    closer: Option<Closer>,
}

impl Resource {
    /// A value without teardown
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::shared(Arc::new(value))
    }

    /// A value the caller keeps a handle to, typically for its teardown
    pub fn shared<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value: value as Value,
            closer: None,
        }
    }

    /// Attach the teardown half
    pub fn with_teardown<F, Fut>(mut self, teardown: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closer = Some(Box::new(move || teardown().boxed()));
        self
    }

    /// Attach a synchronous teardown; it runs on the blocking pool
    pub fn with_blocking_teardown<F>(self, teardown: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.with_teardown(move || async move {
            match tokio::task::spawn_blocking(teardown).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => {
                    anyhow::bail!("teardown panicked: {}", panic_message(err.into_panic().as_ref()))
                }
                Err(err) => Err(anyhow::Error::new(err)),
            }
        })
    }

    fn into_parts(self, fixture: FixtureId) -> (Value, Teardown) {
        (
            self.value,
            Teardown {
                fixture,
                closer: self.closer,
            },
        )
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("has_teardown", &self.closer.is_some())
            .finish()
    }
}

/// Teardown half of an opened fixture; closes at most once
pub struct Teardown {
    fixture: FixtureId,
    closer: Option<Closer>,
}

impl Teardown {
    pub fn fixture(&self) -> &FixtureId {
        &self.fixture
    }

    /// Whether the closer has already been consumed (or never existed)
    pub fn is_closed(&self) -> bool {
        self.closer.is_none()
    }

    /// Run the teardown half; later calls are no-ops
    pub async fn close(&mut self) -> Result<(), TeardownFailure> {
        let Some(closer) = self.closer.take() else {
            return Ok(());
        };
        let closing = async move { closer().await };
        match AssertUnwindSafe(closing).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TeardownFailure::new(
                self.fixture.as_str(),
                truncate(&format!("{err:#}"), MAX_DETAIL_LEN),
            )),
            Err(payload) => Err(TeardownFailure::new(
                self.fixture.as_str(),
                format!("panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("fixture", &self.fixture)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Why a fixture's setup failed; shared by every unit that requested it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupFailure {
    pub fixture: FixtureId,
    pub message: String,
    /// Cause chain, outermost first
    pub chain: Vec<String>,
}

impl SetupFailure {
    fn from_error(fixture: FixtureId, err: &anyhow::Error) -> Self {
        Self {
            fixture,
            message: truncate(&err.to_string(), MAX_DETAIL_LEN),
            chain: err.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }

    fn panicked(fixture: FixtureId, message: String) -> Self {
        Self {
            fixture,
            message: format!("panicked: {message}"),
            chain: Vec::new(),
        }
    }
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.chain {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// A live fixture: the value plus, for function scope, its teardown
///
/// Session handles carry no teardown; the registry owns it.
#[derive(Debug)]
pub struct FixtureHandle {
    pub fixture: FixtureId,
    pub scope: Scope,
    pub value: Value,
    pub teardown: Option<Teardown>,
}

/// Fixture descriptor: identity, scope, and setup factory
#[derive(Clone)]
pub struct Fixture {
    id: FixtureId,
    scope: Scope,
    setup: SetupFn,
}

impl Fixture {
    /// Fixture created fresh for every unit that requests it
    pub fn function<F, Fut>(id: impl Into<FixtureId>, setup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resource>> + Send + 'static,
    {
        Self::with_scope(id, Scope::Function, setup)
    }

    /// Fixture created once per run and shared by every requesting unit
    pub fn session<F, Fut>(id: impl Into<FixtureId>, setup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resource>> + Send + 'static,
    {
        Self::with_scope(id, Scope::Session, setup)
    }

    pub fn with_scope<F, Fut>(id: impl Into<FixtureId>, scope: Scope, setup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resource>> + Send + 'static,
    {
        Self {
            id: id.into(),
            scope,
            setup: Arc::new(move || setup().boxed()),
        }
    }

    /// Fixture whose setup blocks; it runs on the blocking pool
    pub fn blocking<F>(id: impl Into<FixtureId>, scope: Scope, setup: F) -> Self
    where
        F: Fn() -> anyhow::Result<Resource> + Send + Sync + 'static,
    {
        let setup = Arc::new(setup);
        Self::with_scope(id, scope, move || {
            let setup = setup.clone();
            async move {
                match tokio::task::spawn_blocking(move || setup()).await {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => {
                        anyhow::bail!("setup panicked: {}", panic_message(err.into_panic().as_ref()))
                    }
                    Err(err) => Err(anyhow::Error::new(err)),
                }
            }
        })
    }

    pub fn id(&self) -> &FixtureId {
        &self.id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Run setup to its yield point
    pub(crate) async fn open(&self) -> Result<(Value, Teardown), SetupFailure> {
        let setup = self.setup.clone();
        let opening = async move { setup().await };
        match AssertUnwindSafe(opening).catch_unwind().await {
            Ok(Ok(resource)) => Ok(resource.into_parts(self.id.clone())),
            Ok(Err(err)) => Err(SetupFailure::from_error(self.id.clone(), &err)),
            Err(payload) => Err(SetupFailure::panicked(
                self.id.clone(),
                panic_message(payload.as_ref()),
            )),
        }
    }
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_open_splits_value_and_teardown() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let fixture = Fixture::function("number", move || {
            let counter = counter.clone();
            async move {
                Ok(Resource::new(7u32).with_teardown(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
            }
        });

        let (value, mut teardown) = fixture.open().await.unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&7));
        assert!(!teardown.is_closed());

        teardown.close().await.unwrap();
        teardown.close().await.unwrap();
        assert!(teardown.is_closed());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_setup_error_keeps_chain() {
        let fixture = Fixture::session("db", || async {
            Err::<Resource, _>(anyhow::anyhow!("connection refused")).context("connecting to db")
        });

        let failure = fixture.open().await.unwrap_err();
        assert_eq!(failure.fixture.as_str(), "db");
        assert_eq!(failure.message, "connecting to db");
        assert_eq!(failure.chain, vec!["connection refused".to_string()]);
        assert_eq!(failure.to_string(), "connecting to db: connection refused");
    }

    async fn explode() -> anyhow::Result<Resource> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn test_setup_panic_is_caught() {
        let fixture = Fixture::function("explodes", explode);
        let failure = fixture.open().await.unwrap_err();
        assert_eq!(failure.message, "panicked: kaboom");
    }

    #[tokio::test]
    async fn test_teardown_error_is_reported() {
        let fixture = Fixture::function("leaky", || async {
            Ok(Resource::new(())
                .with_teardown(|| async { Err::<(), _>(anyhow::anyhow!("still open")) }))
        });
        let (_, mut teardown) = fixture.open().await.unwrap();
        let failure = teardown.close().await.unwrap_err();
        assert_eq!(failure.fixture, "leaky");
        assert_eq!(failure.message, "still open");
    }

    #[tokio::test]
    async fn test_blocking_fixture_and_teardown() {
        let fixture = Fixture::blocking("file", Scope::Function, || {
            Ok(Resource::new("contents".to_string())
                .with_blocking_teardown(|| anyhow::bail!("disk full")))
        });
        let (value, mut teardown) = fixture.open().await.unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "contents");
        assert_eq!(teardown.close().await.unwrap_err().message, "disk full");
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::Session.to_string(), "session");
        assert_eq!(FixtureId::from("db").to_string(), "db");
    }
}
