//! # Helm Charts
//!
//! Synthesizes a chart index from the chart roots found in the repository and
//! turns each indexed chart into a `HelmRelease` resource pointing back at the
//! Git channel. Rendering is left to the `HelmRelease` consumer.

use crate::constants::{APPS_GROUP, APPS_VERSION};
use crate::controller::git::fetch::CloneOptions;
use crate::controller::git::kustomize::relative_root;
use crate::controller::git::overrides::deep_merge;
use crate::crd::Subscription;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One chart of the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartEntry {
    pub name: String,
    pub version: String,
    /// Chart root relative to the repository
    pub path: String,
}

/// Charts keyed by name; each name lists its versions in discovery order
pub type HelmIndex = BTreeMap<String, Vec<ChartEntry>>;

#[derive(Debug, Deserialize)]
struct ChartMetadata {
    name: Option<String>,
    version: Option<String>,
}

/// Build the index of `chart_dirs`, keeping charts that pass the package filters
///
/// Charts must match the subscription's package name (when set) and the
/// package filter's version (when set, exact match).
pub fn generate_index(
    subscription: &Subscription,
    repo_root: &Path,
    chart_dirs: &[PathBuf],
) -> Result<HelmIndex> {
    let package = subscription.spec.package.as_deref().filter(|p| !p.is_empty());
    let version_filter = subscription
        .spec
        .package_filter
        .as_ref()
        .and_then(|f| f.version.as_deref())
        .filter(|v| !v.is_empty());

    let mut index = HelmIndex::new();
    for dir in chart_dirs {
        let chart_file = dir.join("Chart.yaml");
        let content = std::fs::read_to_string(&chart_file)
            .with_context(|| format!("failed to read {}", chart_file.display()))?;
        let metadata: ChartMetadata = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", chart_file.display()))?;
        let name = metadata
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} has no chart name", chart_file.display()))?;
        let version = metadata
            .version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} has no chart version", chart_file.display()))?;

        if package.is_some_and(|p| p != name) {
            debug!("Chart {name} does not match package filter");
            continue;
        }
        if version_filter.is_some_and(|v| v != version) {
            debug!("Chart {name} version {version} does not match version filter");
            continue;
        }

        index.entry(name.clone()).or_default().push(ChartEntry {
            name,
            version,
            path: relative_root(repo_root, dir),
        });
    }
    Ok(index)
}

/// `HelmRelease` manifest for the last indexed version of a chart
#[must_use]
pub fn helm_release_manifest(
    subscription: &Subscription,
    chart: &ChartEntry,
    clone_options: &CloneOptions,
) -> Value {
    let package_override = subscription
        .spec
        .package_overrides
        .iter()
        .find(|o| o.package_name == chart.name);

    let release_name = package_override
        .and_then(|o| o.package_alias.as_deref())
        .filter(|alias| !alias.is_empty())
        .map_or_else(
            || format!("{}-{}", subscription.name_str(), chart.name),
            str::to_string,
        )
        .to_lowercase();

    let urls: Vec<&str> = clone_options.connections().map(|c| c.url.as_str()).collect();
    let mut git = json!({
        "urls": urls,
        "chartPath": chart.path,
    });
    if let Some(branch) = clone_options.git_ref.branch() {
        git["branch"] = json!(branch);
    }

    let mut release = json!({
        "apiVersion": format!("{APPS_GROUP}/{APPS_VERSION}"),
        "kind": "HelmRelease",
        "metadata": {
            "name": release_name,
            "namespace": subscription.namespace_str(),
        },
        "repo": {
            "chartName": chart.name,
            "version": chart.version,
            "source": {
                "type": "git",
                "git": git,
            },
        },
    });

    // `spec` overrides become the release values
    for entry in package_override.iter().flat_map(|o| &o.package_overrides) {
        let is_spec = entry
            .get("path")
            .and_then(Value::as_str)
            .is_some_and(|p| p.eq_ignore_ascii_case("spec"));
        if let (true, Some(value)) = (is_spec, entry.get("value")) {
            let spec = release
                .as_object_mut()
                .map(|r| r.entry("spec").or_insert_with(|| json!({})));
            if let Some(spec) = spec {
                deep_merge(spec, value.clone());
            }
        }
    }

    release
}
