//! # Hook Templates
//!
//! Discovers `AnsibleJob` templates in a hook directory and turns a template
//! into the instance submitted for one subscription revision.

use crate::constants::{
    ANNOTATION_HOSTING_SUBSCRIPTION, ANSIBLE_JOB_GROUP, ANSIBLE_JOB_KIND, HOOK_TARGET_CLUSTERS_KEY,
};
use crate::controller::git::classify::split_documents;
use crate::crd::{AnsibleJob, ClusterName, Subscription};
use anyhow::{Context, Result};
use kube::Resource;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// `AnsibleJob` documents found under `dir`, in file name order
///
/// A missing directory has no templates. Documents of other kinds are ignored.
pub fn discover_templates(dir: &Path) -> Result<Vec<AnsibleJob>> {
    if !dir.is_dir() {
        debug!("No hook directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut templates = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() || !is_yaml(entry.path()) {
            continue;
        }
        let content = std::fs::read_to_string(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;

        for document in split_documents(&content) {
            let value: Value = serde_yaml::from_str(&document)
                .with_context(|| format!("failed to parse {}", entry.path().display()))?;
            if !is_ansible_job(&value) {
                continue;
            }
            let job: AnsibleJob = serde_json::from_value(value)
                .with_context(|| format!("invalid AnsibleJob in {}", entry.path().display()))?;
            if job.metadata.name.as_deref().is_none_or(str::is_empty) {
                return Err(anyhow::anyhow!(
                    "AnsibleJob in {} has no name",
                    entry.path().display()
                ));
            }
            templates.push(job);
        }
    }
    Ok(templates)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

fn is_ansible_job(value: &Value) -> bool {
    let kind = value.get("kind").and_then(Value::as_str);
    let group = value
        .get("apiVersion")
        .and_then(Value::as_str)
        .and_then(|api_version| api_version.split_once('/'))
        .map(|(group, _)| group);
    kind == Some(ANSIBLE_JOB_KIND) && group == Some(ANSIBLE_JOB_GROUP)
}

/// Instance of `template` for the current revision of `subscription`
///
/// The instance is named `<template><suffix>`, lives in the subscription
/// namespace, is owned by the subscription and drops any server-side identity
/// or status carried by the template.
#[must_use]
pub fn override_template(
    template: &AnsibleJob,
    subscription: &Subscription,
    suffix: &str,
    target_clusters: &[ClusterName],
) -> AnsibleJob {
    let mut job = template.clone();
    let name = template.metadata.name.as_deref().unwrap_or_default();

    job.metadata.name = Some(format!("{name}{suffix}"));
    job.metadata.namespace = Some(subscription.namespace_str().to_string());
    job.metadata.resource_version = None;
    job.metadata.uid = None;
    job.metadata.creation_timestamp = None;
    job.metadata.generation = None;
    job.metadata.managed_fields = None;
    job.status = None;

    if let Some(owner) = subscription.controller_owner_ref(&()) {
        job.metadata.owner_references = Some(vec![owner]);
    }
    job.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            ANNOTATION_HOSTING_SUBSCRIPTION.to_string(),
            subscription.key().to_string(),
        );

    if let Some(secret) = subscription
        .spec
        .hook_secret_ref
        .as_ref()
        .map(|r| r.name.as_str())
        .filter(|name| !name.is_empty())
    {
        job.spec.tower_auth_secret = Some(secret.to_string());
    }

    if !target_clusters.is_empty() {
        let names: Vec<&str> = target_clusters.iter().map(|c| c.name.as_str()).collect();
        let mut extra_vars = match job.spec.extra_vars.take() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        extra_vars.insert(HOOK_TARGET_CLUSTERS_KEY.to_string(), json!(names));
        job.spec.extra_vars = Some(Value::Object(extra_vars));
    }

    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ObjectReference, SubscriptionSpec};
    use kube::ResourceExt;
    use tempfile::TempDir;

    const TEMPLATE: &str = r#"
apiVersion: tower.ansible.com/v1alpha1
kind: AnsibleJob
metadata:
  name: notify
  namespace: somewhere-else
  resourceVersion: "42"
spec:
  job_template_name: notify-team
  extra_vars:
    channel: deploys
status:
  ansibleJobResult:
    status: successful
"#;

    fn subscription() -> Subscription {
        let mut sub = Subscription::new("web", SubscriptionSpec::default());
        sub.metadata.namespace = Some("apps".to_string());
        sub.metadata.uid = Some("0b1c".to_string());
        sub
    }

    mod discovery_tests {
        use super::*;

        #[test]
        fn test_missing_directory_has_no_templates() {
            let dir = TempDir::new().unwrap();
            let templates = discover_templates(&dir.path().join("prehook")).unwrap();
            assert!(templates.is_empty());
        }

        #[test]
        fn test_only_ansible_jobs_are_templates() {
            let dir = TempDir::new().unwrap();
            std::fs::write(
                dir.path().join("a.yaml"),
                format!("{TEMPLATE}\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n"),
            )
            .unwrap();
            std::fs::write(dir.path().join("README.md"), "# hooks").unwrap();

            let templates = discover_templates(dir.path()).unwrap();
            assert_eq!(templates.len(), 1);
            assert_eq!(templates[0].name_any(), "notify");
        }

        #[test]
        fn test_malformed_yaml_is_error() {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("bad.yaml"), "kind: [unclosed\n").unwrap();
            assert!(discover_templates(dir.path()).is_err());
        }
    }

    mod override_tests {
        use super::*;

        fn template() -> AnsibleJob {
            serde_yaml::from_str(TEMPLATE).unwrap()
        }

        #[test]
        fn test_identity_namespace_and_owner() {
            let job = override_template(&template(), &subscription(), "-3-1200", &[]);
            assert_eq!(job.name_any(), "notify-3-1200");
            assert_eq!(job.namespace().as_deref(), Some("apps"));
            assert!(job.metadata.resource_version.is_none());
            assert!(job.status.is_none());
            assert_eq!(job.owner_references()[0].name, "web");
            assert_eq!(
                job.annotations().get(ANNOTATION_HOSTING_SUBSCRIPTION).map(String::as_str),
                Some("apps/web")
            );
            assert_eq!(job.spec.extra_vars, Some(json!({"channel": "deploys"})));
        }

        #[test]
        fn test_auth_secret_and_target_clusters() {
            let mut sub = subscription();
            sub.spec.hook_secret_ref = Some(ObjectReference {
                name: "tower-token".to_string(),
                ..ObjectReference::default()
            });
            let clusters = vec![
                ClusterName { name: "east".to_string() },
                ClusterName { name: "west".to_string() },
            ];
            let job = override_template(&template(), &sub, "-1-1", &clusters);
            assert_eq!(job.spec.tower_auth_secret.as_deref(), Some("tower-token"));
            assert_eq!(
                job.spec.extra_vars,
                Some(json!({"channel": "deploys", "target_clusters": ["east", "west"]}))
            );
        }
    }
}
