//! # Apply Engine
//!
//! Reconciles the desired resource set of a subscription onto the hosting
//! cluster with server-side apply.
//!
//! Resources are applied in the order they are handed over (bucket order), so
//! namespaces and CRDs exist before the objects that need them. Objects that
//! were deployed for a subscription on an earlier call but are no longer part
//! of its desired set are deleted afterwards. The deployed set is tracked in
//! memory, so leftovers from before a controller restart are not pruned.

use crate::constants::FIELD_MANAGER;
use crate::crd::{
    AllowDenyItem, NamespacedName, Subscription, SubscriptionPhase, SubscriptionStatus,
};
use crate::provider::{ApplyEngine, ResourceUnit};
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::{Api, Client, ResourceExt};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Cluster-scoped kinds recognised when discovery has no answer
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "IngressClass",
    "RuntimeClass",
    "Node",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DeployedRef {
    gvk: (String, String, String),
    namespace: Option<String>,
    name: String,
}

impl DeployedRef {
    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.gvk.0, &self.gvk.1, &self.gvk.2)
    }

    fn describes(&self, unit: &ResourceUnit) -> bool {
        self.gvk.0 == unit.gvk.group
            && self.gvk.2 == unit.gvk.kind
            && self.name == unit.resource.name_any()
    }
}

impl std::fmt::Display for DeployedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{} {namespace}/{}", self.gvk.2, self.name),
            None => write!(f, "{} {}", self.gvk.2, self.name),
        }
    }
}

pub struct KubeApplyEngine {
    client: Client,
    discovery: Discovery,
    deployed: Mutex<HashMap<NamespacedName, HashSet<DeployedRef>>>,
}

impl std::fmt::Debug for KubeApplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeApplyEngine").finish_non_exhaustive()
    }
}

impl KubeApplyEngine {
    /// Build the engine, running API discovery once
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .context("API discovery failed")?;
        Ok(Self {
            client,
            discovery,
            deployed: Mutex::new(HashMap::new()),
        })
    }

    async fn api_resource(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
        if let Some((resource, caps)) = self.discovery.resolve_gvk(gvk) {
            return Ok((resource, caps.scope == Scope::Namespaced));
        }
        // Kinds installed after startup, e.g. CRDs from the same resource set
        let (resource, caps) = kube::discovery::pinned_kind(&self.client, gvk)
            .await
            .with_context(|| format!("unknown resource type {}/{} {}", gvk.group, gvk.version, gvk.kind))?;
        Ok((resource, caps.scope == Scope::Namespaced))
    }

    fn api_for(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    async fn apply_one(
        &self,
        subscription: &Subscription,
        unit: &ResourceUnit,
        cluster_admin: bool,
        dry_run: bool,
    ) -> Result<Option<DeployedRef>> {
        let (api_resource, namespaced) = self.api_resource(&unit.gvk).await?;
        let name = unit.resource.name_any();

        if !namespaced && !cluster_admin {
            warn!(
                subscription = %subscription.key(),
                "Skipping cluster-scoped {} {name}: subscription is not cluster admin",
                unit.gvk.kind
            );
            return Ok(None);
        }

        let namespace = namespaced.then(|| {
            unit.resource
                .namespace()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| subscription.namespace_str().to_string())
        });

        let mut object = unit.resource.clone();
        object.metadata.namespace.clone_from(&namespace);
        object.metadata.resource_version = None;
        object.metadata.managed_fields = None;

        let mut params = PatchParams::apply(FIELD_MANAGER).force();
        params.dry_run = dry_run;

        self.api_for(&api_resource, namespace.as_deref())
            .patch(&name, &params, &Patch::Apply(&object))
            .await
            .with_context(|| format!("failed to apply {} {name}", unit.gvk.kind))?;

        let deployed = DeployedRef {
            gvk: (
                unit.gvk.group.clone(),
                unit.gvk.version.clone(),
                unit.gvk.kind.clone(),
            ),
            namespace,
            name,
        };
        debug!("Applied {deployed}");
        Ok(Some(deployed))
    }

    async fn delete_one(&self, deployed: &DeployedRef) -> Result<()> {
        let (api_resource, _) = self.api_resource(&deployed.gvk()).await?;
        match self
            .api_for(&api_resource, deployed.namespace.as_deref())
            .delete(&deployed.name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                info!("Deleted {deployed}, no longer in the desired set");
                Ok(())
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete {deployed}")),
        }
    }
}

/// Whether `gvk` passes the allow and deny lists
///
/// An empty allow list admits everything. A `*` kind matches every kind of
/// the entry's API version.
#[must_use]
pub fn is_allowed(gvk: &GroupVersionKind, allow: &[AllowDenyItem], deny: &[AllowDenyItem]) -> bool {
    let api_version = gvk.api_version();
    let matches = |item: &AllowDenyItem| {
        item.api_version == api_version
            && item
                .kinds
                .iter()
                .any(|kind| kind == "*" || kind == &gvk.kind)
    };
    (allow.is_empty() || allow.iter().any(matches)) && !deny.iter().any(matches)
}

fn is_known_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

#[async_trait]
impl ApplyEngine for KubeApplyEngine {
    async fn process_sub_resources(
        &self,
        subscription: &Subscription,
        resources: Vec<ResourceUnit>,
        allow: &[AllowDenyItem],
        deny: &[AllowDenyItem],
        cluster_admin: bool,
        dry_run: bool,
    ) -> Result<()> {
        let key = subscription.key();
        let mut applied = HashSet::new();
        let mut errors = Vec::new();

        for unit in &resources {
            if !is_allowed(&unit.gvk, allow, deny) {
                debug!(
                    subscription = %key,
                    "{} {} filtered by allow/deny lists",
                    unit.gvk.kind,
                    unit.resource.name_any()
                );
                continue;
            }
            match self.apply_one(subscription, unit, cluster_admin, dry_run).await {
                Ok(Some(deployed)) => {
                    applied.insert(deployed);
                }
                Ok(None) => {}
                Err(err) => {
                    error!(subscription = %key, "{err:#}");
                    errors.push(format!("{err:#}"));
                }
            }
        }

        if dry_run {
            return if errors.is_empty() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(errors.join("; ")))
            };
        }

        let in_desired = |d: &DeployedRef| resources.iter().any(|unit| d.describes(unit));
        let previous = {
            let mut deployed = self
                .deployed
                .lock()
                .map_err(|_err| anyhow::anyhow!("deployed resource registry is poisoned"))?;
            let previous = deployed.remove(&key).unwrap_or_default();
            // Failed applies keep their previous entry so they are not pruned
            let mut current = applied.clone();
            current.extend(previous.iter().filter(|d| in_desired(*d)).cloned());
            deployed.insert(key.clone(), current);
            previous
        };

        for stale in previous.iter().filter(|d| !in_desired(*d)) {
            if let Err(err) = self.delete_one(stale).await {
                warn!(subscription = %key, "{err:#}");
                errors.push(format!("{err:#}"));
            }
        }

        info!(
            subscription = %key,
            "Applied {} of {} resources",
            applied.len(),
            resources.len()
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(errors.join("; ")))
        }
    }

    fn is_resource_namespaced(&self, gvk: &GroupVersionKind) -> bool {
        match self.discovery.resolve_gvk(gvk) {
            Some((_, caps)) => caps.scope == Scope::Namespaced,
            None => !is_known_cluster_scoped(&gvk.kind),
        }
    }

    async fn update_appsub_overall_status(
        &self,
        subscription: &Subscription,
        has_error: bool,
        message: &str,
    ) -> Result<()> {
        let phase = if has_error {
            SubscriptionPhase::Failed
        } else {
            SubscriptionPhase::Subscribed
        };
        let status = SubscriptionStatus {
            phase: Some(phase.as_str().to_string()),
            message: Some(message.to_string()),
            last_update_time: Some(chrono::Utc::now().to_rfc3339()),
            ansiblejobs: None,
        };

        let api: Api<Subscription> =
            Api::namespaced(self.client.clone(), subscription.namespace_str());
        api.patch_status(
            subscription.name_str(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await
        .with_context(|| format!("failed to update overall status of {}", subscription.key()))?;
        Ok(())
    }
}
