//! Assertion helpers
//!
//! Helpers return `Err(AssertionFailure)`, which a body propagates with `?`.
//! The unit executor recognizes the type and classifies the unit as failed
//! rather than errored.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Failure signal raised by a test body
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct AssertionFailure {
    pub message: String,
    pub actual: Option<String>,
    pub expected: Option<String>,
    pub operator: Option<String>,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            actual: None,
            expected: None,
            operator: None,
        }
    }

    /// Attach `Debug` renderings of both sides of a comparison
    pub fn compare(
        message: impl Into<String>,
        actual: &dyn Debug,
        expected: &dyn Debug,
        operator: &str,
    ) -> Self {
        Self {
            message: message.into(),
            actual: Some(format!("{actual:?}")),
            expected: Some(format!("{expected:?}")),
            operator: Some(operator.to_string()),
        }
    }
}

pub type AssertResult = Result<(), AssertionFailure>;

pub fn assert_equal<A, E>(actual: A, expected: E) -> AssertResult
where
    A: PartialEq<E> + Debug,
    E: Debug,
{
    if actual == expected {
        return Ok(());
    }
    Err(AssertionFailure::compare(
        format!("{actual:?} != {expected:?}"),
        &actual,
        &expected,
        "==",
    ))
}

pub fn assert_not_equal<A, E>(actual: A, expected: E) -> AssertResult
where
    A: PartialEq<E> + Debug,
    E: Debug,
{
    if actual != expected {
        return Ok(());
    }
    Err(AssertionFailure::compare(
        format!("{actual:?} == {expected:?}"),
        &actual,
        &expected,
        "!=",
    ))
}

pub fn assert_true(value: bool, message: &str) -> AssertResult {
    if value {
        return Ok(());
    }
    Err(AssertionFailure::compare(message, &value, &true, "is"))
}

pub fn assert_false(value: bool, message: &str) -> AssertResult {
    if !value {
        return Ok(());
    }
    Err(AssertionFailure::compare(message, &value, &false, "is"))
}

pub fn assert_contains<T: PartialEq + Debug>(container: &[T], member: &T) -> AssertResult {
    if container.contains(member) {
        return Ok(());
    }
    Err(AssertionFailure::compare(
        format!("{member:?} not found in {container:?}"),
        member,
        &container,
        "in",
    ))
}

/// Unconditional failure
pub fn fail(message: impl Into<String>) -> AssertResult {
    Err(AssertionFailure::new(message))
}
