//! # Resource Transformer
//!
//! Turns one manifest into a resource ready for the apply engine.
//!
//! ## Pipeline
//!
//! 1. Parse; documents without `apiVersion` or `kind` are skipped
//! 2. Re-stamp the original labels and annotations as strings
//! 3. Namespace-scoping policy for namespaced kinds
//! 4. Package name, label selector and annotation filters
//! 5. Package overrides
//! 6. Cluster-admin and reconcile-option propagation, part-of label
//! 7. Identity annotations on nested subscriptions
//!
//! Nested subscriptions rendered by kustomize that declare `cluster-admin: "true"`
//! themselves are rejected.

use crate::constants::{
    ANNOTATION_CLUSTER_ADMIN, ANNOTATION_RESOURCE_RECONCILE_OPTION, ANNOTATION_USER_GROUP,
    ANNOTATION_USER_IDENTITY, APPS_GROUP, LABEL_APP, LABEL_PART_OF, RECONCILE_OPTION_MERGE,
};
use crate::controller::git::overrides::apply_package_overrides;
use crate::controller::git::selector::selector_matches;
use crate::crd::Subscription;
use crate::provider::{ApplyEngine, ResourceUnit};
use anyhow::{Context, Result};
use kube::core::{DynamicObject, GroupVersionKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Where a manifest came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOrigin {
    File,
    Kustomize,
    Helm,
}

/// Subscription-wide inputs of the transformer
#[derive(Clone, Copy)]
pub struct TransformContext<'a> {
    pub subscription: &'a Subscription,
    pub apply: &'a dyn ApplyEngine,
}

impl std::fmt::Debug for TransformContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformContext")
            .field("subscription", &self.subscription.key())
            .finish_non_exhaustive()
    }
}

/// Result of transforming one manifest
#[derive(Debug, Clone)]
pub enum Transformed {
    Resource(ResourceUnit),
    /// Not a cluster resource, or filtered out
    Skipped(String),
}

/// Transform a raw YAML document
pub fn transform_manifest(
    raw: &str,
    ctx: &TransformContext<'_>,
    origin: ManifestOrigin,
) -> Result<Transformed> {
    let document: serde_yaml::Value = match serde_yaml::from_str(raw) {
        Ok(document) => document,
        Err(err) => return Ok(Transformed::Skipped(format!("not parseable as YAML: {err}"))),
    };
    if !has_type_meta(&document) {
        return Ok(Transformed::Skipped("not a Kubernetes resource".to_string()));
    }

    let labels = string_map(document.get("metadata").and_then(|m| m.get("labels")));
    let annotations = string_map(document.get("metadata").and_then(|m| m.get("annotations")));

    let mut resource: Value =
        serde_json::to_value(&document).context("manifest cannot be represented as JSON")?;
    if let Some(metadata) = resource.get_mut("metadata").and_then(Value::as_object_mut) {
        if let Some(labels) = labels {
            metadata.insert("labels".to_string(), to_json_map(labels));
        }
        if let Some(annotations) = annotations {
            metadata.insert("annotations".to_string(), to_json_map(annotations));
        }
    }

    transform_value(resource, ctx, origin)
}

/// Transform an already structured resource
pub fn transform_value(
    mut resource: Value,
    ctx: &TransformContext<'_>,
    origin: ManifestOrigin,
) -> Result<Transformed> {
    let Some(gvk) = type_meta(&resource) else {
        return Ok(Transformed::Skipped("not a Kubernetes resource".to_string()));
    };
    let subscription = ctx.subscription;
    let nested_subscription = is_subscription_kind(&gvk);
    let name = str_at(&resource, &["metadata", "name"]).unwrap_or_default().to_string();

    if origin == ManifestOrigin::Kustomize
        && nested_subscription
        && annotation(&resource, ANNOTATION_CLUSTER_ADMIN).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return Err(anyhow::anyhow!(
            "{}/{} {name} contains annotation {ANNOTATION_CLUSTER_ADMIN} set to true",
            gvk.group,
            gvk.kind
        ));
    }

    if ctx.apply.is_resource_namespaced(&gvk) {
        apply_namespace_policy(&mut resource, subscription, nested_subscription);
    }

    if let Some(reason) = filter_out_reason(&resource, &name, subscription, origin)? {
        debug!("Skipping {} {name}: {reason}", gvk.kind);
        return Ok(Transformed::Skipped(reason));
    }

    // Helm releases are filtered and overridden by chart name when generated
    if origin != ManifestOrigin::Helm && !subscription.spec.package_overrides.is_empty() {
        apply_package_overrides(&mut resource, &name, &subscription.spec.package_overrides)
            .with_context(|| format!("failed to override package {name}"))?;
    }

    propagate_annotations(&mut resource, subscription);
    set_part_of_label(&mut resource, subscription);

    if nested_subscription {
        if let Some(user) = subscription.user_identity() {
            set_annotation(&mut resource, ANNOTATION_USER_IDENTITY, user);
        }
        if let Some(group) = subscription.user_group() {
            set_annotation(&mut resource, ANNOTATION_USER_GROUP, group);
        }
    }

    let object: DynamicObject = serde_json::from_value(resource)
        .with_context(|| format!("{} {name} is not a valid object", gvk.kind))?;
    Ok(Transformed::Resource(ResourceUnit {
        resource: object,
        gvk,
    }))
}

fn apply_namespace_policy(resource: &mut Value, subscription: &Subscription, nested_subscription: bool) {
    let declared = str_at(resource, &["metadata", "namespace"])
        .filter(|ns| !ns.is_empty())
        .is_some();

    if subscription.is_cluster_admin() {
        if !declared || subscription.is_current_namespace_scoped() {
            set_namespace(resource, subscription.namespace_str());
        }
        if nested_subscription {
            set_annotation(resource, ANNOTATION_CLUSTER_ADMIN, "true");
        }
    } else {
        set_namespace(resource, subscription.namespace_str());
    }
}

/// Why the package filter rejects this resource, if it does
fn filter_out_reason(
    resource: &Value,
    name: &str,
    subscription: &Subscription,
    origin: ManifestOrigin,
) -> Result<Option<String>> {
    if let Some(package) = subscription.spec.package.as_deref().filter(|p| !p.is_empty()) {
        if origin != ManifestOrigin::Helm && package != name {
            return Ok(Some(format!("name does not match package {package}")));
        }
    }

    let Some(filter) = &subscription.spec.package_filter else {
        return Ok(None);
    };

    if let Some(selector) = &filter.label_selector {
        let labels = object_strings(resource, "labels");
        if !selector_matches(selector, &labels)? {
            return Ok(Some("labels do not match the package filter".to_string()));
        }
    }

    if !filter.annotations.is_empty() {
        let annotations = object_strings(resource, "annotations");
        if let Some((key, _)) = filter
            .annotations
            .iter()
            .find(|(key, value)| annotations.get(*key) != Some(*value))
        {
            return Ok(Some(format!("annotation {key} does not match the package filter")));
        }
    }

    Ok(None)
}

fn propagate_annotations(resource: &mut Value, subscription: &Subscription) {
    if subscription.is_cluster_admin() {
        set_annotation(resource, ANNOTATION_CLUSTER_ADMIN, "true");
    }

    let declared = annotation(resource, ANNOTATION_RESOURCE_RECONCILE_OPTION)
        .is_some_and(|v| !v.is_empty());
    if !declared {
        let option = subscription
            .annotation(ANNOTATION_RESOURCE_RECONCILE_OPTION)
            .filter(|v| !v.is_empty())
            .unwrap_or(RECONCILE_OPTION_MERGE)
            .to_string();
        set_annotation(resource, ANNOTATION_RESOURCE_RECONCILE_OPTION, &option);
    }
}

fn set_part_of_label(resource: &mut Value, subscription: &Subscription) {
    let present = object_strings(resource, "labels")
        .get(LABEL_PART_OF)
        .is_some_and(|v| !v.is_empty());
    if present {
        return;
    }
    let part_of = subscription
        .label(LABEL_PART_OF)
        .or_else(|| subscription.label(LABEL_APP))
        .filter(|v| !v.is_empty())
        .unwrap_or(subscription.name_str())
        .to_string();
    if let Some(labels) = metadata_map(resource, "labels") {
        labels.insert(LABEL_PART_OF.to_string(), Value::String(part_of));
    }
}

fn is_subscription_kind(gvk: &GroupVersionKind) -> bool {
    gvk.group.eq_ignore_ascii_case(APPS_GROUP) && gvk.kind.eq_ignore_ascii_case("Subscription")
}

fn has_type_meta(document: &serde_yaml::Value) -> bool {
    let non_empty = |key: &str| {
        document
            .get(key)
            .and_then(serde_yaml::Value::as_str)
            .is_some_and(|v| !v.is_empty())
    };
    non_empty("apiVersion") && non_empty("kind")
}

/// Group/version/kind of a resource carrying `apiVersion` and `kind`
#[must_use]
pub fn type_meta(resource: &Value) -> Option<GroupVersionKind> {
    let api_version = str_at(resource, &["apiVersion"]).filter(|v| !v.is_empty())?;
    let kind = str_at(resource, &["kind"]).filter(|v| !v.is_empty())?;
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    Some(GroupVersionKind::gvk(group, version, kind))
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(Value::as_str)
}

fn annotation<'a>(resource: &'a Value, key: &str) -> Option<&'a str> {
    str_at(resource, &["metadata", "annotations", key])
}

/// String entries of `metadata.<field>`
fn object_strings(resource: &Value, field: &str) -> BTreeMap<String, String> {
    resource
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Mutable `metadata.<field>` map, created when missing
fn metadata_map<'a>(resource: &'a mut Value, field: &str) -> Option<&'a mut Map<String, Value>> {
    let metadata = resource
        .as_object_mut()?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    let entry = metadata
        .as_object_mut()?
        .entry(field)
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut()
}

fn set_annotation(resource: &mut Value, key: &str, value: &str) {
    if let Some(annotations) = metadata_map(resource, "annotations") {
        annotations.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn set_namespace(resource: &mut Value, namespace: &str) {
    if let Some(metadata) = resource.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
    }
}

/// Labels or annotations with every scalar value rendered as a string
fn string_map(value: Option<&serde_yaml::Value>) -> Option<BTreeMap<String, String>> {
    let mapping = value?.as_mapping()?;
    Some(
        mapping
            .iter()
            .filter_map(|(key, value)| {
                let key = scalar_string(key)?;
                let value = scalar_string(value).unwrap_or_default();
                Some((key, value))
            })
            .collect(),
    )
}

fn scalar_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

fn to_json_map(map: BTreeMap<String, String>) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}
