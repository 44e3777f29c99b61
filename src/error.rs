//! Error definitions
//!
//! Discovery errors are reported before scheduling and never become test
//! results. Fixture errors travel inside a test body's `anyhow::Error` and
//! are classified by the unit executor.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::fixtures::{FixtureId, SetupFailure};

/// Discovery-phase configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryError {
    #[error("{test}: declares {declared} argument(s) but {provided} parameter list(s) were supplied")]
    ArityMismatch {
        test: String,
        declared: usize,
        provided: usize,
    },

    #[error("{test}: registered more than once")]
    DuplicateTest { test: String },

    #[error("{test}: {reason}")]
    InvalidDefinition { test: String, reason: String },

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("discovery aborted: {reason}")]
    Aborted { reason: String },

    #[error("{test}: not scheduled, the run is no longer admitting units")]
    SchedulerClosed { test: String },
}

impl DiscoveryError {
    pub fn invalid_definition(test: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            test: test.into(),
            reason: reason.into(),
        }
    }

    /// Name in the error taxonomy
    pub fn kind(&self) -> &'static str {
        "discovery_config_error"
    }
}

/// Fixture acquisition errors
#[derive(Error, Debug, Clone)]
pub enum FixtureError {
    #[error("fixture '{fixture}' failed during setup: {cause}")]
    Setup {
        fixture: FixtureId,
        cause: Arc<SetupFailure>,
    },

    #[error("fixture '{fixture}' does not hold a {expected}")]
    TypeMismatch {
        fixture: FixtureId,
        expected: &'static str,
    },

    #[error("session fixture '{0}' requested after session teardown")]
    RegistryClosed(FixtureId),

    #[error("fixture '{0}' requested after the unit finished")]
    ContextFinished(FixtureId),
}

impl FixtureError {
    pub fn fixture(&self) -> &FixtureId {
        match self {
            FixtureError::Setup { fixture, .. }
            | FixtureError::TypeMismatch { fixture, .. }
            | FixtureError::RegistryClosed(fixture)
            | FixtureError::ContextFinished(fixture) => fixture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_error_messages() {
        let err = DiscoveryError::ArityMismatch {
            test: "t.rs::test_add".into(),
            declared: 1,
            provided: 2,
        };
        assert_eq!(
            err.to_string(),
            "t.rs::test_add: declares 1 argument(s) but 2 parameter list(s) were supplied"
        );
        assert_eq!(err.kind(), "discovery_config_error");
    }

    #[test]
    fn test_discovery_error_serializes_tagged() {
        let err = DiscoveryError::DuplicateTest {
            test: "t.rs::a".into(),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "duplicate_test");
        assert_eq!(value["test"], "t.rs::a");
    }

    #[test]
    fn test_fixture_error_names_fixture() {
        let err = FixtureError::RegistryClosed(FixtureId::from("db"));
        assert_eq!(err.fixture().as_str(), "db");
        assert!(err.to_string().contains("after session teardown"));
    }
}
