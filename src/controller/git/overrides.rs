//! # Package Overrides
//!
//! Applies `spec.packageOverrides` entries to a resource whose name matches the
//! override's `packageName`. Each entry is `{path, value}` where `path` is a
//! dot-separated field path; object values are deep-merged, anything else
//! replaces the target field.

use crate::crd::PackageOverride;
use anyhow::Result;
use serde_json::{Map, Value};

/// Apply every override targeting `resource_name`
///
/// Returns the number of entries applied.
pub fn apply_package_overrides(
    resource: &mut Value,
    resource_name: &str,
    overrides: &[PackageOverride],
) -> Result<usize> {
    let mut applied = 0;
    for package in overrides.iter().filter(|o| o.package_name == resource_name) {
        for entry in &package.package_overrides {
            apply_override_entry(resource, entry)?;
            applied += 1;
        }
    }
    Ok(applied)
}

fn apply_override_entry(resource: &mut Value, entry: &Value) -> Result<()> {
    let path = entry
        .get("path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| anyhow::anyhow!("override entry has no path: {entry}"))?;
    let value = entry
        .get("value")
        .ok_or_else(|| anyhow::anyhow!("override entry for '{path}' has no value"))?;

    set_path(resource, path, value.clone())
}

/// Set the dot-separated `path` inside `target`, creating missing objects
pub fn set_path(target: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(anyhow::anyhow!("empty override path"));
    };

    let mut current = target;
    for segment in parents {
        let object = current
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("cannot override '{path}': '{segment}' has a non-object parent"))?;
        current = object
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let object = current
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("cannot override '{path}': parent of '{leaf}' is not an object"))?;
    match object.get_mut(*leaf) {
        Some(existing) if existing.is_object() && value.is_object() => deep_merge(existing, value),
        _ => {
            object.insert((*leaf).to_string(), value);
        }
    }
    Ok(())
}

/// Merge `patch` into `base`; objects merge key by key, everything else replaces
pub fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}
