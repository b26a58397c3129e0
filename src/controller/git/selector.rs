//! # Label Selectors
//!
//! Evaluates Kubernetes label selectors against a label map.

use crate::crd::{LabelSelector, LabelSelectorRequirement};
use anyhow::Result;
use std::collections::BTreeMap;

/// True when `labels` satisfies every `matchLabels` entry and every `matchExpressions` requirement.
///
/// An empty selector matches everything. An unknown operator is an error.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> Result<bool> {
    let labels_match = selector
        .match_labels
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value));
    if !labels_match {
        return Ok(false);
    }

    for requirement in &selector.match_expressions {
        if !requirement_matches(requirement, labels)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool> {
    let value = labels.get(&requirement.key);
    match requirement.operator.as_str() {
        "In" => Ok(value.is_some_and(|v| requirement.values.contains(v))),
        "NotIn" => Ok(!value.is_some_and(|v| requirement.values.contains(v))),
        "Exists" => Ok(value.is_some()),
        "DoesNotExist" => Ok(value.is_none()),
        other => Err(anyhow::anyhow!(
            "unsupported label selector operator '{other}' for key '{}'",
            requirement.key
        )),
    }
}
