//! Schedulable units and their argument bindings

use anyhow::{anyhow, Result};
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use super::definition::{TestDefinition, Value};

/// One bound argument: declared name, display name, and value
#[derive(Clone)]
pub struct ArgBinding {
    pub name: String,
    pub display: String,
    value: Value,
}

impl ArgBinding {
    pub fn new(name: impl Into<String>, display: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            display: display.into(),
            value,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl fmt::Debug for ArgBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.display)
    }
}

/// Argument values handed to a test body, in declared order
#[derive(Clone, Debug, Default)]
pub struct Args {
    bindings: Vec<ArgBinding>,
}

impl Args {
    pub fn new(bindings: Vec<ArgBinding>) -> Self {
        Self { bindings }
    }

    /// Look up an argument by declared name
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<&T> {
        let binding = self
            .bindings
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| anyhow!("no argument named '{name}'"))?;
        downcast_arg(binding)
    }

    /// Look up an argument by position
    pub fn at<T: Any + Send + Sync>(&self, index: usize) -> Result<&T> {
        let binding = self
            .bindings
            .get(index)
            .ok_or_else(|| anyhow!("no argument at position {index}"))?;
        downcast_arg(binding)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArgBinding> {
        self.bindings.iter()
    }
}

fn downcast_arg<T: Any + Send + Sync>(binding: &ArgBinding) -> Result<&T> {
    binding.value.downcast_ref::<T>().ok_or_else(|| {
        anyhow!(
            "argument '{}' ({}) is not a {}",
            binding.name,
            binding.display,
            type_name::<T>()
        )
    })
}

/// One element of the cartesian product over a definition's parameter lists
#[derive(Clone, Debug)]
pub struct ParamBinding {
    pub args: Args,
    /// Display names joined with `-`, disambiguated within one expansion
    pub id: String,
}

/// A definition bound to at most one parameter binding
#[derive(Clone, Debug)]
pub struct TestUnit {
    pub definition: Arc<TestDefinition>,
    pub binding: Option<ParamBinding>,
    pub id: String,
    /// Submission order, assigned on admission
    pub seq: u64,
}

impl TestUnit {
    pub fn new(definition: Arc<TestDefinition>, binding: Option<ParamBinding>) -> Self {
        let id = match &binding {
            Some(binding) => format!("{}[{}]", definition.base_id(), binding.id),
            None => definition.base_id(),
        };
        Self {
            definition,
            binding,
            id,
            seq: 0,
        }
    }

    pub fn args(&self) -> Args {
        self.binding
            .as_ref()
            .map(|b| b.args.clone())
            .unwrap_or_default()
    }

    pub fn param_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.id.as_str())
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
