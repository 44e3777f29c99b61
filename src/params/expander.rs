//! Parameter expansion
//!
//! Turns one definition into the cartesian product of its parameter lists.
//! The leftmost list is the outermost loop, so it varies slowest.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::DiscoveryError;
use crate::models::{ArgBinding, Args, ParamBinding, TestDefinition, TestUnit};

/// Check the parts of a definition that identifiers are built from
pub fn validate(definition: &TestDefinition) -> Result<(), DiscoveryError> {
    let test = definition.base_id();
    if definition.path().trim().is_empty() {
        return Err(DiscoveryError::invalid_definition(test, "empty path"));
    }
    if definition.name().trim().is_empty() {
        return Err(DiscoveryError::invalid_definition(test, "empty test name"));
    }
    if definition.name().contains("::") || definition.name().contains('[') {
        return Err(DiscoveryError::invalid_definition(
            test,
            "test name may not contain '::' or '['",
        ));
    }

    let declared = definition.declared_args().len();
    let provided = definition.param_lists().len();
    if declared != provided {
        return Err(DiscoveryError::ArityMismatch {
            test,
            declared,
            provided,
        });
    }

    let mut seen = HashSet::new();
    if let Some(dup) = definition.declared_args().iter().find(|arg| !seen.insert(arg.as_str())) {
        return Err(DiscoveryError::invalid_definition(
            test,
            format!("argument '{dup}' declared twice"),
        ));
    }
    Ok(())
}

/// Expand a definition into its concrete units, in deterministic order
pub fn expand(definition: &Arc<TestDefinition>) -> Result<Vec<TestUnit>, DiscoveryError> {
    validate(definition)?;

    let lists = definition.param_lists();
    if lists.is_empty() {
        return Ok(vec![TestUnit::new(definition.clone(), None)]);
    }

    if let Some(position) = lists.iter().position(|list| list.is_empty()) {
        warn!(
            test = %definition.base_id(),
            "parameter list for '{}' is empty; no units generated",
            definition.declared_args()[position]
        );
        return Ok(Vec::new());
    }

    let total = lists
        .iter()
        .try_fold(1usize, |acc, list| acc.checked_mul(list.len()))
        .ok_or_else(|| {
            DiscoveryError::invalid_definition(definition.base_id(), "parameter product overflows")
        })?;

    let mut taken = HashSet::with_capacity(total);
    let mut units = Vec::with_capacity(total);
    let mut indices = vec![0usize; lists.len()];

    for ordinal in 0..total {
        // Mixed-radix decode with the rightmost list as the lowest digit
        let mut rest = ordinal;
        for (slot, list) in indices.iter_mut().zip(lists).rev() {
            *slot = rest % list.len();
            rest /= list.len();
        }

        let mut bindings = Vec::with_capacity(lists.len());
        let mut names = Vec::with_capacity(lists.len());
        for ((list, &index), arg) in lists.iter().zip(&indices).zip(definition.declared_args()) {
            if let Some(param) = list.get(index) {
                names.push(param.name());
                bindings.push(ArgBinding::new(arg.as_str(), param.name(), param.raw().clone()));
            }
        }

        let id = unique_id(names.join("-"), &mut taken);
        units.push(TestUnit::new(
            definition.clone(),
            Some(ParamBinding {
                args: Args::new(bindings),
                id,
            }),
        ));
    }

    debug!(test = %definition.base_id(), units = units.len(), "expanded definition");
    Ok(units)
}

/// Append `#n` (n from 2) until the id is unused within this expansion
fn unique_id(base: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{base}#{n}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
