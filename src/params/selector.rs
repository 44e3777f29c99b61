//! Run selection
//!
//! Selectors follow the identifier grammar `path[::test[[params]]]`; the
//! `path::test::[params]` spelling is accepted too. A path matches itself
//! or any path beneath it, test names and parameter ids match exactly.

use std::fmt;
use std::str::FromStr;

use crate::error::DiscoveryError;
use crate::models::{TestDefinition, TestUnit};

/// One parsed selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    path: String,
    test: Option<String>,
    params: Option<String>,
}

impl Selector {
    pub fn parse(raw: &str) -> Result<Self, DiscoveryError> {
        let invalid = |reason: &str| DiscoveryError::InvalidSelector {
            selector: raw.to_string(),
            reason: reason.to_string(),
        };

        let normalized = raw.trim().replace("::[", "[");
        if normalized.is_empty() {
            return Err(invalid("empty selector"));
        }

        let Some((path, rest)) = normalized.split_once("::") else {
            if normalized.contains('[') {
                return Err(invalid("parameter id without a test name"));
            }
            return Ok(Self {
                path: normalized.trim_end_matches('/').to_string(),
                test: None,
                params: None,
            });
        };

        if path.is_empty() {
            return Err(invalid("empty path"));
        }

        let (test, params) = match rest.split_once('[') {
            Some((test, tail)) => {
                let params = tail
                    .strip_suffix(']')
                    .ok_or_else(|| invalid("unterminated parameter id"))?;
                (test, Some(params.to_string()))
            }
            None => (rest, None),
        };

        if test.is_empty() {
            return Err(invalid("empty test name"));
        }
        if test.contains("::") {
            return Err(invalid("too many '::' separators"));
        }

        Ok(Self {
            path: path.trim_end_matches('/').to_string(),
            test: Some(test.to_string()),
            params,
        })
    }

    /// Definition-level check, applied before expansion
    pub fn matches_definition(&self, definition: &TestDefinition) -> bool {
        self.matches_path(definition.path())
            && self.test.as_deref().map_or(true, |test| test == definition.name())
    }

    /// Unit-level check, applied to expanded identifiers
    pub fn matches_unit(&self, unit: &TestUnit) -> bool {
        if !self.matches_definition(&unit.definition) {
            return false;
        }
        match (&self.params, unit.param_id()) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
        }
    }

    fn matches_path(&self, path: &str) -> bool {
        match path.strip_prefix(self.path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.path.is_empty(),
            None => false,
        }
    }
}

impl FromStr for Selector {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if let Some(test) = &self.test {
            write!(f, "::{test}")?;
        }
        if let Some(params) = &self.params {
            write!(f, "[{params}]")?;
        }
        Ok(())
    }
}

/// Selectors plus an optional marker; empty selects everything
#[derive(Debug, Clone, Default)]
pub struct Selection {
    selectors: Vec<Selector>,
    marker: Option<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse every raw selector; the first invalid one is reported
    pub fn parse<I, S>(raw: I) -> Result<Self, DiscoveryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selectors = raw
            .into_iter()
            .map(|s| Selector::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            selectors,
            marker: None,
        })
    }

    pub fn with_marker(mut self, marker: Option<String>) -> Self {
        self.marker = marker.filter(|m| !m.is_empty());
        self
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn admits_definition(&self, definition: &TestDefinition) -> bool {
        if let Some(marker) = &self.marker {
            if !definition.has_marker(marker) {
                return false;
            }
        }
        self.selectors.is_empty() || self.selectors.iter().any(|s| s.matches_definition(definition))
    }

    pub fn admits_unit(&self, unit: &TestUnit) -> bool {
        self.selectors.is_empty() || self.selectors.iter().any(|s| s.matches_unit(unit))
    }
}
