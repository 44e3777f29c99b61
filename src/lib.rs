//! trialrun - concurrent test execution engine
//!
//! Runs test definitions on a bounded pool of concurrent slots, with
//! parameterized expansion and function or session scoped fixtures.
//!
//! ## Features
//!
//! - Cartesian parameter expansion with stable, collision-free identifiers
//! - Two-phase fixtures; session fixtures set up once per run and shared
//! - Producer/consumer scheduling with backpressure and result streaming
//! - Failure taxonomy separating assertions, errors, fixture failures and timeouts
//! - Multiple output formats (Table, JSON, CSV, Summary)
//!
//! ## Usage
//!
//! ```no_run
//! use trialrun::prelude::*;
//!
//! fn main() -> std::process::ExitCode {
//!     let double = TestDefinition::asynchronous("math.rs", "test_double", |_, args| async move {
//!         let n = *args.get::<i32>("n")?;
//!         assert_equal(n * 2, n + n)?;
//!         Ok(())
//!     })
//!     .args(["n"])
//!     .param(ParamList::values([1, 2, 3]));
//!
//!     trialrun::cli::main(vec![double])
//! }
//! ```

pub mod assertions;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod fixtures;
pub mod models;
pub mod output;
pub mod params;
pub mod utils;

pub use assertions::{AssertResult, AssertionFailure};
pub use config::RunConfig;
pub use error::{DiscoveryError, FixtureError};
pub use executor::{RunOutcome, RunReport, RunState, RunSummary, Scheduler, UnitExecutor};
pub use fixtures::{Fixture, FixtureRegistry, Resource, Scope, TestContext};
pub use models::{
    Args, FailureDetail, FailureKind, Outcome, Param, ParamList, TestDefinition, TestResult,
    TestUnit,
};

/// Everything a test suite needs to define and run tests
pub mod prelude {
    pub use crate::assertions::{
        assert_contains, assert_equal, assert_false, assert_not_equal, assert_true, fail,
    };
    pub use crate::executor::Scheduler;
    pub use crate::fixtures::{Fixture, Resource, Scope, TestContext};
    pub use crate::models::{Args, Param, ParamList, TestDefinition};
}
