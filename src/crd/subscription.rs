//! # Subscription
//!
//! Declarative intent binding a Git channel (repository, ref and path) to the
//! desired resource state of this cluster.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: apps.open-cluster-management.io/v1
//! kind: Subscription
//! metadata:
//!   name: guestbook
//!   namespace: apps
//!   annotations:
//!     apps.open-cluster-management.io/git-path: guestbook/base
//!     apps.open-cluster-management.io/git-branch: main
//!     apps.open-cluster-management.io/reconcile-rate: medium
//! spec:
//!   channel: channels/guestbook-repo
//!   placement:
//!     local: true
//! ```

use crate::constants::{
    ANNOTATION_CLUSTER_ADMIN, ANNOTATION_CURRENT_NAMESPACE_SCOPED, ANNOTATION_USER_GROUP,
    ANNOTATION_USER_IDENTITY, ANNOTATION_WEBHOOK_ENABLED, LABEL_SUBSCRIPTION_PAUSE,
};
use crate::crd::{NamespacedName, ObjectReference, SubscriptionStatus};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, Default)]
#[kube(
    kind = "Subscription",
    group = "apps.open-cluster-management.io",
    version = "v1",
    namespaced,
    status = "SubscriptionStatus",
    shortname = "appsub",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Primary channel, `namespace/name`
    pub channel: String,
    /// Fallback channel tried when the primary cannot be fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_channel: Option<String>,
    /// Package name; when set, only resources with this exact name are deployed
    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_filter: Option<PackageFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_overrides: Vec<PackageOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(default, rename = "timewindow", skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    /// Secret holding the automation platform credentials for hook jobs
    #[serde(default, rename = "hooksecretref", skip_serializing_if = "Option::is_none")]
    pub hook_secret_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<AllowDenyItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<AllowDenyItem>,
}

/// Filters applied to every manifest before deployment
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Helm chart version filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// ConfigMap whose `path` key relocates the resource path inside the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_ref: Option<ObjectReference>,
}

/// Kubernetes label selector
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,
    /// `In`, `NotIn`, `Exists` or `DoesNotExist`
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Overrides keyed by package name
///
/// For plain manifests the package name is the resource name and each entry
/// is `{path, value}`. For kustomize roots the package name is the root's
/// relative path and the single entry carries the kustomization fields to
/// merge under `value`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageOverride {
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_alias: Option<String>,
    #[serde(default)]
    pub package_overrides: Vec<serde_json::Value>,
}

/// Cluster placement of the subscription
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ClusterName {
    pub name: String,
}

impl Placement {
    /// True when the subscription deploys to the hosting cluster only
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.local.unwrap_or(false)
    }
}

/// Deployment window of the subscription
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TimeWindow {
    /// `active` (deploy only inside the window) or `blocked` (never inside the window)
    #[serde(default, rename = "windowtype", skip_serializing_if = "Option::is_none")]
    pub window_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, rename = "daysofweek", skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hours: Vec<HourRange>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HourRange {
    pub start: String,
    pub end: String,
}

/// Allow or deny entry forwarded to the apply engine
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllowDenyItem {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kinds: Vec<String>,
}

impl Subscription {
    /// `namespace/name` key of this subscription
    #[must_use]
    pub fn key(&self) -> NamespacedName {
        NamespacedName::from_resource(self)
    }

    /// Namespace of the subscription, empty when unset
    #[must_use]
    pub fn namespace_str(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn name_str(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    fn annotation_is_true(&self, key: &str) -> bool {
        self.annotation(key)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    #[must_use]
    pub fn is_cluster_admin(&self) -> bool {
        self.annotation_is_true(ANNOTATION_CLUSTER_ADMIN)
    }

    #[must_use]
    pub fn is_current_namespace_scoped(&self) -> bool {
        self.annotation_is_true(ANNOTATION_CURRENT_NAMESPACE_SCOPED)
    }

    #[must_use]
    pub fn is_webhook_enabled(&self) -> bool {
        self.annotation_is_true(ANNOTATION_WEBHOOK_ENABLED)
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.label(LABEL_SUBSCRIPTION_PAUSE)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    /// Acting user recorded on the subscription
    #[must_use]
    pub fn user_identity(&self) -> Option<&str> {
        self.annotation(ANNOTATION_USER_IDENTITY)
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn user_group(&self) -> Option<&str> {
        self.annotation(ANNOTATION_USER_GROUP)
            .filter(|value| !value.is_empty())
    }

    /// Key of the primary channel
    #[must_use]
    pub fn channel_key(&self) -> NamespacedName {
        NamespacedName::parse_with_default(&self.spec.channel, self.namespace_str())
    }

    /// Key of the secondary channel, if any
    #[must_use]
    pub fn secondary_channel_key(&self) -> Option<NamespacedName> {
        self.spec
            .secondary_channel
            .as_deref()
            .filter(|channel| !channel.is_empty())
            .map(|channel| NamespacedName::parse_with_default(channel, self.namespace_str()))
    }
}
