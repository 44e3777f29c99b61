//! Fixtures: two-phase resources with function or session scope
//!
//! - [`Fixture`] describes a setup factory and its scope
//! - [`FixtureRegistry`] caches session fixtures for one run
//! - [`TestContext`] owns the function fixtures of one executing unit

mod capture;
mod context;
mod registry;
mod resource;

pub use capture::{CaptureWriter, OutputCapture};
pub use context::TestContext;
pub use registry::FixtureRegistry;
pub use resource::{Fixture, FixtureHandle, FixtureId, Resource, Scope, SetupFailure, Teardown};
