//! Fixture registry
//!
//! Owns session-scoped fixtures for one run. The first request for a session
//! fixture inserts a shared setup future under the registry lock; every later
//! or concurrent request awaits that same future, so setup runs exactly once
//! and a failed setup poisons the fixture for the rest of the run.
//!
//! A setup that completes after [`FixtureRegistry::teardown_all_sessions`]
//! has run is closed on the spot instead of being cached.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::resource::{Fixture, FixtureHandle, FixtureId, Scope, SetupFailure, Teardown};
use crate::error::FixtureError;
use crate::models::{TeardownFailure, Value};

type SessionOutcome = Result<Value, Arc<SetupFailure>>;
type SessionSlot = Shared<BoxFuture<'static, SessionOutcome>>;

/// Session fixture cache and teardown owner
#[derive(Default)]
pub struct FixtureRegistry {
    slots: Mutex<HashMap<FixtureId, SessionSlot>>,
    /// Teardowns in order of first successful creation
    created: Arc<Mutex<Vec<Teardown>>>,
    /// Flipped under the `created` lock
    closed: Arc<AtomicBool>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a fixture to a live handle
    ///
    /// Function scope always runs setup and hands the teardown to the caller.
    /// Session scope returns the cached value and keeps the teardown.
    pub async fn acquire(&self, fixture: &Fixture) -> Result<FixtureHandle, FixtureError> {
        match fixture.scope() {
            Scope::Function => {
                let (value, teardown) =
                    fixture
                        .open()
                        .await
                        .map_err(|cause| FixtureError::Setup {
                            fixture: fixture.id().clone(),
                            cause: Arc::new(cause),
                        })?;
                Ok(FixtureHandle {
                    fixture: fixture.id().clone(),
                    scope: Scope::Function,
                    value,
                    teardown: Some(teardown),
                })
            }
            Scope::Session => self.acquire_session(fixture).await,
        }
    }

    async fn acquire_session(&self, fixture: &Fixture) -> Result<FixtureHandle, FixtureError> {
        if self.is_closed() {
            return Err(FixtureError::RegistryClosed(fixture.id().clone()));
        }

        let slot = self
            .slots
            .lock()
            .entry(fixture.id().clone())
            .or_insert_with(|| self.first_setup(fixture))
            .clone();

        match slot.await {
            Ok(_) if self.is_closed() => Err(FixtureError::RegistryClosed(fixture.id().clone())),
            Ok(value) => Ok(FixtureHandle {
                fixture: fixture.id().clone(),
                scope: Scope::Session,
                value,
                teardown: None,
            }),
            Err(cause) => Err(FixtureError::Setup {
                fixture: fixture.id().clone(),
                cause,
            }),
        }
    }

    fn first_setup(&self, fixture: &Fixture) -> SessionSlot {
        let fixture = fixture.clone();
        let created = self.created.clone();
        let closed = self.closed.clone();

        async move {
            debug!(fixture = %fixture.id(), "setting up session fixture");
            match fixture.open().await {
                Ok((value, teardown)) => {
                    let late = {
                        let mut created = created.lock();
                        if closed.load(Ordering::Acquire) {
                            Some(teardown)
                        } else {
                            created.push(teardown);
                            None
                        }
                    };
                    if let Some(mut teardown) = late {
                        warn!(
                            fixture = %fixture.id(),
                            "session fixture finished setup after teardown, closing it now"
                        );
                        if let Err(failure) = teardown.close().await {
                            warn!("{}", failure);
                        }
                    }
                    Ok(value)
                }
                Err(failure) => {
                    warn!(fixture = %fixture.id(), "session fixture poisoned: {}", failure);
                    Err(Arc::new(failure))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Number of session fixtures that completed setup and await teardown
    pub fn live_sessions(&self) -> usize {
        self.created.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear down every session fixture in reverse creation order
    ///
    /// Errors are collected, never raised. Only the first call does work;
    /// afterwards the registry refuses session requests.
    pub async fn teardown_all_sessions(&self) -> Vec<TeardownFailure> {
        let mut teardowns = {
            let mut created = self.created.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                warn!("session teardown already ran for this run");
                return Vec::new();
            }
            std::mem::take(&mut *created)
        };
        info!("Tearing down {} session fixture(s)", teardowns.len());

        let mut failures = Vec::new();
        while let Some(mut teardown) = teardowns.pop() {
            debug!(fixture = %teardown.fixture(), "tearing down session fixture");
            if let Err(failure) = teardown.close().await {
                warn!("{}", failure);
                failures.push(failure);
            }
        }
        failures
    }
}
