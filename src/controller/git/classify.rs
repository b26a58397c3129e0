//! # Resource Classification
//!
//! Walks a fetched tree and partitions its manifests into ordered buckets.
//!
//! ## Rules
//!
//! - A directory holding `Chart.yaml` is a Helm chart root; its subtree is not walked.
//! - A directory holding `kustomization.yaml`, `kustomization.yml` or `Kustomization`
//!   is a kustomize root; its subtree is not walked.
//! - `CustomResourceDefinition` and `Namespace` documents go first.
//! - Service accounts, roles and their bindings go next.
//! - Every other document with `apiVersion` and `kind` goes to "other".
//!
//! Classification is per YAML document, so a multi-document file can feed
//! several buckets. The walk is sorted by file name, making the result a pure
//! function of the tree.

use crate::constants::{POSTHOOK_DIR, PREHOOK_DIR};
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const CHART_FILE: &str = "Chart.yaml";
const KUSTOMIZATION_FILES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];

const CRD_AND_NAMESPACE_KINDS: [&str; 2] = ["CustomResourceDefinition", "Namespace"];
const RBAC_KINDS: [&str; 5] = [
    "ServiceAccount",
    "Role",
    "ClusterRole",
    "RoleBinding",
    "ClusterRoleBinding",
];

static DOCUMENT_SEPARATOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^---[ \t]*(#.*)?$").ok());

/// One YAML document of a manifest file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    pub path: PathBuf,
    /// Position of the document inside its file
    pub index: usize,
    pub content: String,
}

/// The five ordered partitions of a classified tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceBuckets {
    pub chart_dirs: Vec<PathBuf>,
    pub kustomize_dirs: Vec<PathBuf>,
    pub crds_and_namespaces: Vec<ManifestDocument>,
    pub rbac: Vec<ManifestDocument>,
    pub other: Vec<ManifestDocument>,
}

impl ResourceBuckets {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chart_dirs.is_empty()
            && self.kustomize_dirs.is_empty()
            && self.crds_and_namespaces.is_empty()
            && self.rbac.is_empty()
            && self.other.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Directories left out of the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPolicy {
    SkipNothing,
    /// `prehook/` and `posthook/` directly under the resource path hold hook
    /// templates, not deployable resources
    SkipHookDirectories,
}

impl SkipPolicy {
    fn skips(self, resource_path: &Path, dir: &Path) -> bool {
        match self {
            SkipPolicy::SkipNothing => false,
            SkipPolicy::SkipHookDirectories => {
                dir.parent() == Some(resource_path)
                    && dir
                        .file_name()
                        .is_some_and(|name| name == PREHOOK_DIR || name == POSTHOOK_DIR)
            }
        }
    }
}

/// Partition the manifests under `resource_path` (inside `repo_root`)
pub fn classify(repo_root: &Path, resource_path: &Path, skip: SkipPolicy) -> Result<ResourceBuckets> {
    if !resource_path.is_dir() {
        return Err(anyhow::anyhow!(
            "resource path {} does not exist in the repository",
            resource_path.display()
        ));
    }

    let mut buckets = ResourceBuckets::default();
    let git_dir = repo_root.join(".git");
    let mut walker = WalkDir::new(resource_path).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("failed to walk {}", resource_path.display()))?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            if entry.file_name() == ".git" || path == git_dir || skip.skips(resource_path, path) {
                debug!("Skipping directory {}", path.display());
                walker.skip_current_dir();
            } else if path.join(CHART_FILE).is_file() {
                debug!("Found helm chart root {}", path.display());
                buckets.chart_dirs.push(path.to_path_buf());
                walker.skip_current_dir();
            } else if KUSTOMIZATION_FILES.iter().any(|f| path.join(f).is_file()) {
                debug!("Found kustomize root {}", path.display());
                buckets.kustomize_dirs.push(path.to_path_buf());
                walker.skip_current_dir();
            }
            continue;
        }

        if entry.file_type().is_file() && is_yaml_file(path) {
            classify_file(path, &mut buckets)?;
        }
    }

    info!(
        charts = buckets.chart_dirs.len(),
        kustomizations = buckets.kustomize_dirs.len(),
        crds_and_namespaces = buckets.crds_and_namespaces.len(),
        rbac = buckets.rbac.len(),
        other = buckets.other.len(),
        "Classified {}",
        resource_path.display()
    );
    Ok(buckets)
}

fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

fn classify_file(path: &Path, buckets: &mut ResourceBuckets) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let Ok(content) = String::from_utf8(bytes) else {
        warn!("Skipping {}: not valid UTF-8", path.display());
        return Ok(());
    };

    for (index, document) in split_documents(&content).into_iter().enumerate() {
        let Some(kind) = document_kind(&document) else {
            debug!("{} document {index} is not a Kubernetes resource", path.display());
            continue;
        };
        let manifest = ManifestDocument {
            path: path.to_path_buf(),
            index,
            content: document,
        };
        if CRD_AND_NAMESPACE_KINDS.contains(&kind.as_str()) {
            buckets.crds_and_namespaces.push(manifest);
        } else if RBAC_KINDS.contains(&kind.as_str()) {
            buckets.rbac.push(manifest);
        } else {
            buckets.other.push(manifest);
        }
    }
    Ok(())
}

/// `kind` of a document that also declares an `apiVersion`
fn document_kind(document: &str) -> Option<String> {
    let value: serde_yaml::Value = serde_yaml::from_str(document).ok()?;
    let api_version = value.get("apiVersion")?.as_str()?;
    let kind = value.get("kind")?.as_str()?;
    (!api_version.is_empty() && !kind.is_empty()).then(|| kind.to_string())
}

/// Split a YAML stream into its non-empty documents
#[must_use]
pub fn split_documents(content: &str) -> Vec<String> {
    let documents: Vec<&str> = match DOCUMENT_SEPARATOR.as_ref() {
        Some(separator) => separator.split(content).collect(),
        None => content.split("\n---").collect(),
    };
    documents
        .into_iter()
        .filter(|doc| {
            doc.lines()
                .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        })
        .map(|doc| doc.trim_matches('\n').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    const NAMESPACE: &str = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: web\n";
    const CRD: &str = "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: widgets.example.com\n";
    const ROLE: &str = "apiVersion: rbac.authorization.k8s.io/v1\nkind: Role\nmetadata:\n  name: reader\n";

    fn deployment(name: &str) -> String {
        format!("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}\n")
    }

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "app/namespace.yaml", NAMESPACE);
        write(root, "app/crd.yml", CRD);
        write(root, "app/deploy-a.yaml", &deployment("a"));
        write(root, "app/deploy-b.yaml", &deployment("b"));
        write(root, "app/rbac.yaml", &format!("{ROLE}---\n{}", deployment("c")));
        write(root, "app/notes.txt", "not yaml");
        write(root, "app/values.yaml", "replicas: 2\n");
        write(root, "app/chart/Chart.yaml", "name: web\nversion: 1.0.0\n");
        write(root, "app/chart/templates/svc.yaml", &deployment("templated"));
        write(root, "app/overlay/kustomization.yaml", "resources: []\n");
        write(root, "app/overlay/patch.yaml", &deployment("patched"));
        write(root, "app/prehook/job.yaml", &deployment("hook"));
        write(root, ".git/config.yaml", &deployment("git-internal"));
        dir
    }

    mod classify_tests {
        use super::*;

        #[test]
        fn test_buckets() {
            let dir = sample_tree();
            let root = dir.path();
            let buckets =
                classify(root, &root.join("app"), SkipPolicy::SkipHookDirectories).unwrap();

            assert_eq!(buckets.chart_dirs, vec![root.join("app/chart")]);
            assert_eq!(buckets.kustomize_dirs, vec![root.join("app/overlay")]);
            assert_eq!(buckets.crds_and_namespaces.len(), 2);
            assert_eq!(buckets.rbac.len(), 1);
            assert_eq!(buckets.rbac[0].path, root.join("app/rbac.yaml"));

            let other: Vec<_> = buckets
                .other
                .iter()
                .map(|m| m.path.strip_prefix(root).unwrap().to_path_buf())
                .collect();
            assert_eq!(
                other,
                vec![
                    PathBuf::from("app/deploy-a.yaml"),
                    PathBuf::from("app/deploy-b.yaml"),
                    PathBuf::from("app/rbac.yaml"),
                ]
            );
            assert_eq!(buckets.other[2].index, 1);
        }

        #[test]
        fn test_hook_directories_only_skipped_on_request() {
            let dir = sample_tree();
            let root = dir.path();
            let buckets = classify(root, &root.join("app"), SkipPolicy::SkipNothing).unwrap();
            assert!(buckets
                .other
                .iter()
                .any(|m| m.path.ends_with("prehook/job.yaml")));
        }

        #[test]
        fn test_git_directory_is_never_walked() {
            let dir = sample_tree();
            let root = dir.path();
            let buckets = classify(root, root, SkipPolicy::SkipNothing).unwrap();
            assert!(!buckets.other.iter().any(|m| m.path.starts_with(root.join(".git"))));
        }

        #[test]
        fn test_classification_is_deterministic() {
            let dir = sample_tree();
            let root = dir.path();
            let first = classify(root, root, SkipPolicy::SkipHookDirectories).unwrap();
            let second = classify(root, root, SkipPolicy::SkipHookDirectories).unwrap();
            assert_eq!(first, second);
        }

        #[test]
        fn test_missing_resource_path_is_error() {
            let dir = TempDir::new().unwrap();
            assert!(classify(dir.path(), &dir.path().join("nope"), SkipPolicy::SkipNothing).is_err());
        }

        #[test]
        fn test_root_kustomization_captures_whole_tree() {
            let dir = TempDir::new().unwrap();
            write(dir.path(), "kustomization.yaml", "resources: [deploy.yaml]\n");
            write(dir.path(), "deploy.yaml", &deployment("a"));
            let buckets = classify(dir.path(), dir.path(), SkipPolicy::SkipNothing).unwrap();
            assert_eq!(buckets.kustomize_dirs, vec![dir.path().to_path_buf()]);
            assert!(buckets.other.is_empty());
        }

        #[test]
        fn test_non_utf8_file_is_skipped() {
            let dir = TempDir::new().unwrap();
            write(dir.path(), "deploy.yaml", &deployment("a"));
            std::fs::write(dir.path().join("binary.yaml"), [0xff, 0xfe, 0x00, 0x6b]).unwrap();
            let buckets = classify(dir.path(), dir.path(), SkipPolicy::SkipNothing).unwrap();
            assert_eq!(buckets.other.len(), 1);
            assert_eq!(buckets.other[0].path, dir.path().join("deploy.yaml"));
        }
    }

    mod split_tests {
        use super::*;

        #[test]
        fn test_split_documents() {
            let stream = "---\na: 1\n---\n# only a comment\n---   \nb: 2\n";
            assert_eq!(split_documents(stream), vec!["a: 1", "b: 2"]);
        }

        #[test]
        fn test_separator_inside_value_is_kept() {
            let stream = "data:\n  text: |\n    a---b\n";
            assert_eq!(split_documents(stream).len(), 1);
        }
    }
}
