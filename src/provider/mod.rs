//! # Provider Modules
//!
//! Collaborators the sync loop and the hook gate talk to.
//!
//! Each collaborator is a trait so the core can run against the cluster
//! (`cluster` module) or against in-memory fakes in tests:
//! - `SubscriptionStore` reads subscriptions, channels and their references
//! - `ApplyEngine` creates/updates/deletes the desired resource set
//! - `PlacementResolver` turns a placement into target clusters
//! - `GitTransport` clones repositories and probes remote heads
//! - `HookJobClient` reads and submits hook jobs

use crate::controller::git::{ChannelConnection, CloneOptions};
use crate::crd::{
    AllowDenyItem, AnsibleJob, Channel, ClusterName, NamespacedName, Subscription,
    SubscriptionStatus,
};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::core::{DynamicObject, GroupVersionKind};

/// One resource of the desired set, with its group/version/kind
#[derive(Debug, Clone)]
pub struct ResourceUnit {
    pub resource: DynamicObject,
    pub gvk: GroupVersionKind,
}

/// Read access to subscriptions and the objects they reference
///
/// `Ok(None)` means the object does not exist.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_subscription(&self, key: &NamespacedName) -> Result<Option<Subscription>>;

    async fn get_channel(&self, key: &NamespacedName) -> Result<Option<Channel>>;

    async fn get_secret(&self, key: &NamespacedName) -> Result<Option<Secret>>;

    async fn get_config_map(&self, key: &NamespacedName) -> Result<Option<ConfigMap>>;

    /// Merge-patch the status subresource of a subscription
    async fn update_subscription_status(
        &self,
        key: &NamespacedName,
        status: &SubscriptionStatus,
    ) -> Result<()>;
}

/// The engine that reconciles the desired resource set onto the cluster
#[async_trait]
pub trait ApplyEngine: Send + Sync {
    /// Replace the desired set of `subscription` with `resources`, applied in order
    async fn process_sub_resources(
        &self,
        subscription: &Subscription,
        resources: Vec<ResourceUnit>,
        allow: &[AllowDenyItem],
        deny: &[AllowDenyItem],
        cluster_admin: bool,
        dry_run: bool,
    ) -> Result<()>;

    /// Whether objects of `gvk` live in a namespace
    fn is_resource_namespaced(&self, gvk: &GroupVersionKind) -> bool;

    async fn update_appsub_overall_status(
        &self,
        subscription: &Subscription,
        has_error: bool,
        message: &str,
    ) -> Result<()>;
}

/// Resolves the clusters a subscription targets
///
/// Priority: placement reference, then explicit cluster names, then the
/// cluster label selector.
#[async_trait]
pub trait PlacementResolver: Send + Sync {
    async fn resolve_clusters(&self, subscription: &Subscription) -> Result<Vec<ClusterName>>;
}

/// Low-level Git access for one channel connection
#[async_trait]
pub trait GitTransport: Send + Sync {
    /// Clone or update `options.dest_dir` at the requested ref, returning the checked-out commit
    async fn clone_repo(&self, options: &CloneOptions, channel: &ChannelConnection)
        -> Result<String>;

    /// Commit the requested ref currently points at on the remote
    async fn remote_head(&self, options: &CloneOptions, channel: &ChannelConnection)
        -> Result<String>;
}

/// Access to hook job instances
#[async_trait]
pub trait HookJobClient: Send + Sync {
    async fn get_job(&self, key: &NamespacedName) -> Result<Option<AnsibleJob>>;

    /// Create the job, or update it when it already exists
    async fn apply_job(&self, job: &AnsibleJob) -> Result<()>;
}

pub mod git;
pub mod cluster;
