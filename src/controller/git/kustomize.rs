//! # Kustomize Roots
//!
//! Applies kustomization overrides and runs `kustomize build` on each
//! kustomize root found by classification.
//!
//! A package override targets a kustomize root when its `packageName` equals the
//! root's path relative to the repository (a trailing `kustomization.yaml` is
//! ignored). The `value` of each override entry is deep-merged into the
//! kustomization file before the build.

use crate::controller::git::classify::split_documents;
use crate::controller::git::overrides::deep_merge;
use crate::crd::PackageOverride;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

const KUSTOMIZATION_FILES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Path of `dir` relative to `repo_root`, `/`-separated; empty for the root itself
#[must_use]
pub fn relative_root(repo_root: &Path, dir: &Path) -> String {
    dir.strip_prefix(repo_root)
        .unwrap_or(dir)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip a trailing kustomization file name and surrounding slashes
fn normalize_package_path(package_name: &str) -> &str {
    let mut path = package_name.trim().trim_matches('/');
    for file in KUSTOMIZATION_FILES {
        if let Some(stripped) = path.strip_suffix(file) {
            path = stripped.trim_end_matches('/');
            break;
        }
    }
    path.trim_start_matches("./")
}

fn kustomization_file(dir: &Path) -> Option<PathBuf> {
    KUSTOMIZATION_FILES
        .iter()
        .map(|file| dir.join(file))
        .find(|path| path.is_file())
}

/// Merge matching overrides into the kustomization file of `dir`
///
/// Returns whether the file was rewritten.
pub fn apply_kustomize_overrides(
    overrides: &[PackageOverride],
    relative_path: &str,
    dir: &Path,
) -> Result<bool> {
    let relative_path = relative_path.trim_matches('/');
    let matching: Vec<&PackageOverride> = overrides
        .iter()
        .filter(|o| {
            let name = normalize_package_path(&o.package_name);
            name == relative_path || (relative_path.is_empty() && name == ".")
        })
        .collect();
    if matching.is_empty() {
        return Ok(false);
    }

    let file = kustomization_file(dir)
        .ok_or_else(|| anyhow::anyhow!("no kustomization file in {}", dir.display()))?;
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: serde_yaml::Value = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    let mut kustomization: Value = serde_json::to_value(parsed)
        .with_context(|| format!("{} cannot be represented as JSON", file.display()))?;
    if kustomization.is_null() {
        kustomization = Value::Object(serde_json::Map::new());
    }

    for package in matching {
        for entry in &package.package_overrides {
            let patch = entry.get("value").cloned().unwrap_or_else(|| entry.clone());
            if !patch.is_object() {
                return Err(anyhow::anyhow!(
                    "override for kustomization {relative_path} must be an object, got {patch}"
                ));
            }
            deep_merge(&mut kustomization, patch);
        }
    }

    let rendered = serde_yaml::to_string(&kustomization)
        .with_context(|| format!("failed to render {}", file.display()))?;
    std::fs::write(&file, rendered).with_context(|| format!("failed to write {}", file.display()))?;
    info!("Applied package overrides to {}", file.display());
    Ok(true)
}

/// Run `kustomize build` on `dir` and split the output into documents
pub async fn build(binary: &str, dir: &Path) -> Result<Vec<String>> {
    let span = info_span!(
        "kustomize.build",
        kustomize.path = %dir.display(),
        operation.success = tracing::field::Empty
    );
    let span_clone = span.clone();
    let start = Instant::now();

    let result = async {
        let binary_path = which::which(binary)
            .with_context(|| format!("kustomize binary '{binary}' not found"))?;

        let output = tokio::process::Command::new(binary_path)
            .arg("build")
            .arg(dir)
            .output()
            .await
            .context("failed to execute kustomize build")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("kustomize build failed for {}: {stderr}", dir.display());
            return Err(anyhow::anyhow!(
                "kustomize build {} failed: {}",
                dir.display(),
                stderr.trim()
            ));
        }

        let stdout =
            String::from_utf8(output.stdout).context("kustomize output is not valid UTF-8")?;
        let documents = split_documents(&stdout);
        debug!(
            "kustomize build rendered {} documents in {:?}",
            documents.len(),
            start.elapsed()
        );
        Ok(documents)
    }
    .instrument(span)
    .await;

    span_clone.record("operation.success", result.is_ok());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn override_for(name: &str, value: Value) -> PackageOverride {
        PackageOverride {
            package_name: name.to_string(),
            package_alias: None,
            package_overrides: vec![json!({ "value": value })],
        }
    }

    mod path_tests {
        use super::*;

        #[test]
        fn test_relative_root() {
            assert_eq!(relative_root(Path::new("/repo"), Path::new("/repo/a/b")), "a/b");
            assert_eq!(relative_root(Path::new("/repo"), Path::new("/repo")), "");
        }

        #[test]
        fn test_normalize_package_path() {
            assert_eq!(normalize_package_path("overlays/prod/kustomization.yaml"), "overlays/prod");
            assert_eq!(normalize_package_path("/overlays/prod/"), "overlays/prod");
            assert_eq!(normalize_package_path("overlays/prod/kustomization.yml"), "overlays/prod");
        }
    }

    mod override_tests {
        use super::*;

        #[test]
        fn test_override_merged_into_kustomization() {
            let dir = TempDir::new().unwrap();
            let file = dir.path().join("kustomization.yaml");
            std::fs::write(&file, "resources:\n- deploy.yaml\nnamePrefix: dev-\n").unwrap();

            let overrides = vec![override_for(
                "overlays/dev/kustomization.yaml",
                json!({"namePrefix": "prod-", "commonLabels": {"env": "prod"}}),
            )];
            assert!(apply_kustomize_overrides(&overrides, "overlays/dev", dir.path()).unwrap());

            let merged: serde_yaml::Value =
                serde_yaml::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
            assert_eq!(merged["namePrefix"].as_str(), Some("prod-"));
            assert_eq!(merged["commonLabels"]["env"].as_str(), Some("prod"));
            assert_eq!(merged["resources"][0].as_str(), Some("deploy.yaml"));
        }

        #[test]
        fn test_unrelated_override_leaves_file_alone() {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("kustomization.yaml"), "resources: []\n").unwrap();
            let overrides = vec![override_for("other", json!({"namePrefix": "x-"}))];
            assert!(!apply_kustomize_overrides(&overrides, "overlays/dev", dir.path()).unwrap());
        }

        #[test]
        fn test_non_object_override_is_error() {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("kustomization.yaml"), "resources: []\n").unwrap();
            let overrides = vec![override_for("base", json!("not a map"))];
            assert!(apply_kustomize_overrides(&overrides, "base", dir.path()).is_err());
        }
    }

    mod build_tests {
        use super::*;

        #[tokio::test]
        async fn test_missing_binary_is_error() {
            let dir = TempDir::new().unwrap();
            let err = build("/nonexistent/kustomize", dir.path()).await.unwrap_err();
            assert!(err.to_string().contains("not found"));
        }
    }
}
