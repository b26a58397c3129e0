//! # Placement Resolver
//!
//! Resolves the managed clusters a subscription targets. A placement
//! reference wins over explicit cluster names, which win over the cluster
//! label selector. A local placement targets no managed cluster.

use crate::controller::git::selector::selector_matches;
use crate::crd::{ClusterName, LabelSelector, ObjectReference, Subscription};
use crate::provider::PlacementResolver;
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::ListParams;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::{Api, Client, ResourceExt};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

const PLACEMENT_RULE_GROUP: &str = "apps.open-cluster-management.io";
const CLUSTER_GROUP: &str = "cluster.open-cluster-management.io";
const PLACEMENT_LABEL: &str = "cluster.open-cluster-management.io/placement";

#[derive(Clone)]
pub struct KubePlacement {
    client: Client,
}

impl std::fmt::Debug for KubePlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubePlacement").finish_non_exhaustive()
    }
}

impl KubePlacement {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(gvk);
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    async fn from_placement_ref(
        &self,
        reference: &ObjectReference,
        namespace: &str,
    ) -> Result<Vec<ClusterName>> {
        let key = reference.key(namespace);
        let is_placement = reference.kind.as_deref() == Some("Placement");

        let decisions = if is_placement {
            let gvk = GroupVersionKind::gvk(CLUSTER_GROUP, "v1beta1", "PlacementDecision");
            let params = ListParams::default().labels(&format!("{PLACEMENT_LABEL}={}", key.name));
            self.dynamic_api(&gvk, Some(&key.namespace))
                .list(&params)
                .await
                .with_context(|| format!("failed to list placement decisions of {key}"))?
                .items
        } else {
            let gvk = GroupVersionKind::gvk(PLACEMENT_RULE_GROUP, "v1", "PlacementRule");
            self.dynamic_api(&gvk, Some(&key.namespace))
                .get_opt(&key.name)
                .await
                .with_context(|| format!("failed to get placement rule {key}"))?
                .into_iter()
                .collect()
        };

        let mut clusters = BTreeSet::new();
        for decision in &decisions {
            clusters.extend(decision_clusters(&decision.data));
        }
        debug!("Placement {key} selects {} clusters", clusters.len());
        Ok(clusters.into_iter().map(|name| ClusterName { name }).collect())
    }

    async fn from_selector(&self, selector: &LabelSelector) -> Result<Vec<ClusterName>> {
        let gvk = GroupVersionKind::gvk(CLUSTER_GROUP, "v1", "ManagedCluster");
        let managed = self
            .dynamic_api(&gvk, None)
            .list(&ListParams::default())
            .await
            .context("failed to list managed clusters")?;

        let mut clusters = Vec::new();
        for cluster in &managed.items {
            if selector_matches(selector, cluster.labels())? {
                clusters.push(ClusterName {
                    name: cluster.name_any(),
                });
            }
        }
        Ok(clusters)
    }
}

/// Cluster names in `status.decisions[].clusterName`
fn decision_clusters(data: &Value) -> Vec<String> {
    data.pointer("/status/decisions")
        .and_then(Value::as_array)
        .map(|decisions| {
            decisions
                .iter()
                .filter_map(|d| d.get("clusterName").and_then(Value::as_str))
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl PlacementResolver for KubePlacement {
    async fn resolve_clusters(&self, subscription: &Subscription) -> Result<Vec<ClusterName>> {
        let Some(placement) = subscription.spec.placement.as_ref() else {
            return Ok(Vec::new());
        };
        if placement.is_local() {
            return Ok(Vec::new());
        }

        if let Some(reference) = placement
            .placement_ref
            .as_ref()
            .filter(|r| !r.name.is_empty())
        {
            return self
                .from_placement_ref(reference, subscription.namespace_str())
                .await;
        }
        if !placement.clusters.is_empty() {
            return Ok(placement.clusters.clone());
        }
        match &placement.cluster_selector {
            Some(selector) => self.from_selector(selector).await,
            None => Ok(Vec::new()),
        }
    }
}
