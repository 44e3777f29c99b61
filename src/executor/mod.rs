//! Test execution engine
//!
//! A bounded queue feeds a fixed pool of slots; each slot runs one unit at a
//! time through the [`UnitExecutor`] and hands the result to the aggregator.

mod aggregate;
mod scheduler;
mod unit;

pub use aggregate::{ResultAggregator, RunReport, RunSummary};
pub use scheduler::{RunHandle, RunOutcome, RunState, Scheduler, Submitter};
pub use unit::UnitExecutor;
