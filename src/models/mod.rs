//! Data models for test execution
//!
//! This module contains the data structures shared by discovery, the
//! executor, and reporting.

mod definition;
mod test_result;
mod unit;

pub use definition::{AsyncBody, BlockingBody, Param, ParamList, TestBody, TestDefinition, Value};
pub use test_result::{
    CapturedOutput, FailureDetail, FailureKind, Outcome, TeardownFailure, TestResult,
};
pub use unit::{ArgBinding, Args, ParamBinding, TestUnit};
