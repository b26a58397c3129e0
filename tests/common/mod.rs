//! Common test utilities
//!
//! In-memory stand-ins for the cluster and Git collaborators, so the sync loop
//! and the hook gate can run without a cluster or a network.

#![allow(dead_code, reason = "each test binary uses a different subset of the fakes")]

use anyhow::Result;
use async_trait::async_trait;
use git_subscription_controller::controller::git::{ChannelConnection, CloneOptions};
use git_subscription_controller::crd::{
    AllowDenyItem, AnsibleJob, AnsibleJobResult, AnsibleJobStatus, Channel, ChannelSpec,
    ClusterName, NamespacedName, Subscription, SubscriptionSpec, SubscriptionStatus,
};
use git_subscription_controller::provider::{
    ApplyEngine, GitTransport, HookJobClient, PlacementResolver, ResourceUnit, SubscriptionStore,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::core::GroupVersionKind;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const NAMESPACE: &str = "apps";
pub const COMMIT: &str = "3f786850e387550fdab836ed7e6dc881de23001b";

/// Subscription `apps/<name>` on channel `apps/repo`
pub fn subscription(name: &str, annotations: &[(&str, &str)]) -> Subscription {
    let mut sub = Subscription::new(
        name,
        SubscriptionSpec {
            channel: format!("{NAMESPACE}/repo"),
            ..Default::default()
        },
    );
    sub.metadata.namespace = Some(NAMESPACE.to_string());
    sub.metadata.generation = Some(1);
    sub.metadata.resource_version = Some("100".to_string());
    sub.metadata.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    );
    sub
}

pub fn git_channel() -> Channel {
    let mut channel = Channel::new(
        "repo",
        ChannelSpec {
            channel_type: "Git".to_string(),
            pathname: "https://git.example.com/org/repo.git".to_string(),
            ..Default::default()
        },
    );
    channel.metadata.namespace = Some(NAMESPACE.to_string());
    channel
}

/// Subscriptions, channels, secrets and config maps held in memory
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: Mutex<HashMap<NamespacedName, Subscription>>,
    channels: Mutex<HashMap<NamespacedName, Channel>>,
    secrets: Mutex<HashMap<NamespacedName, Secret>>,
    config_maps: Mutex<HashMap<NamespacedName, ConfigMap>>,
    status_writes: Mutex<Vec<(NamespacedName, SubscriptionStatus)>>,
}

impl MemoryStore {
    pub fn with(subscription: Subscription, channel: Channel) -> Self {
        let store = Self::default();
        store.put_subscription(subscription);
        store.put_channel(channel);
        store
    }

    pub fn put_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.key(), subscription);
    }

    pub fn remove_subscription(&self, key: &NamespacedName) {
        self.subscriptions.lock().unwrap().remove(key);
    }

    pub fn put_channel(&self, channel: Channel) {
        self.channels.lock().unwrap().insert(channel.key(), channel);
    }

    pub fn status_writes(&self) -> Vec<(NamespacedName, SubscriptionStatus)> {
        self.status_writes.lock().unwrap().clone()
    }

    pub fn status_of(&self, key: &NamespacedName) -> Option<SubscriptionStatus> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(key)
            .and_then(|sub| sub.status.clone())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn get_subscription(&self, key: &NamespacedName) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.lock().unwrap().get(key).cloned())
    }

    async fn get_channel(&self, key: &NamespacedName) -> Result<Option<Channel>> {
        Ok(self.channels.lock().unwrap().get(key).cloned())
    }

    async fn get_secret(&self, key: &NamespacedName) -> Result<Option<Secret>> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    async fn get_config_map(&self, key: &NamespacedName) -> Result<Option<ConfigMap>> {
        Ok(self.config_maps.lock().unwrap().get(key).cloned())
    }

    /// Merge semantics: only fields that are set overwrite the stored status
    async fn update_subscription_status(
        &self,
        key: &NamespacedName,
        status: &SubscriptionStatus,
    ) -> Result<()> {
        self.status_writes
            .lock()
            .unwrap()
            .push((key.clone(), status.clone()));

        let mut subscriptions = self.subscriptions.lock().unwrap();
        let Some(sub) = subscriptions.get_mut(key) else {
            return Err(anyhow::anyhow!("subscription {key} not found"));
        };
        let current = sub.status.get_or_insert_with(Default::default);
        if status.phase.is_some() {
            current.phase.clone_from(&status.phase);
        }
        if status.message.is_some() {
            current.message.clone_from(&status.message);
        }
        if status.last_update_time.is_some() {
            current.last_update_time.clone_from(&status.last_update_time);
        }
        if status.ansiblejobs.is_some() {
            current.ansiblejobs.clone_from(&status.ansiblejobs);
        }
        Ok(())
    }
}

/// One `process_sub_resources` call
#[derive(Debug, Clone)]
pub struct ApplyCall {
    pub subscription: NamespacedName,
    /// `Kind/name` of every unit, in hand-over order
    pub resources: Vec<String>,
    pub namespaces: Vec<Option<String>>,
    pub cluster_admin: bool,
}

/// Apply engine that records what it is asked to do
#[derive(Default)]
pub struct RecordingApply {
    calls: Mutex<Vec<ApplyCall>>,
    overall: Mutex<Vec<(NamespacedName, bool, String)>>,
}

impl RecordingApply {
    pub fn calls(&self) -> Vec<ApplyCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn overall_status_calls(&self) -> Vec<(NamespacedName, bool, String)> {
        self.overall.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApplyEngine for RecordingApply {
    async fn process_sub_resources(
        &self,
        subscription: &Subscription,
        resources: Vec<ResourceUnit>,
        _allow: &[AllowDenyItem],
        _deny: &[AllowDenyItem],
        cluster_admin: bool,
        _dry_run: bool,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(ApplyCall {
            subscription: subscription.key(),
            resources: resources
                .iter()
                .map(|unit| format!("{}/{}", unit.gvk.kind, unit.resource.name_any()))
                .collect(),
            namespaces: resources.iter().map(|unit| unit.resource.namespace()).collect(),
            cluster_admin,
        });
        Ok(())
    }

    fn is_resource_namespaced(&self, gvk: &GroupVersionKind) -> bool {
        !matches!(gvk.kind.as_str(), "Namespace" | "CustomResourceDefinition")
    }

    async fn update_appsub_overall_status(
        &self,
        subscription: &Subscription,
        has_error: bool,
        message: &str,
    ) -> Result<()> {
        self.overall
            .lock()
            .unwrap()
            .push((subscription.key(), has_error, message.to_string()));
        Ok(())
    }
}

/// Git transport that "clones" by writing a fixture tree into the destination
pub struct FixtureTransport {
    files: Mutex<BTreeMap<String, String>>,
    commit: Mutex<String>,
    clones: AtomicUsize,
    probes: AtomicUsize,
}

impl FixtureTransport {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: Mutex::new(
                files
                    .iter()
                    .map(|(path, content)| ((*path).to_string(), (*content).to_string()))
                    .collect(),
            ),
            commit: Mutex::new(COMMIT.to_string()),
            clones: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_commit(&self, commit: &str) {
        *self.commit.lock().unwrap() = commit.to_string();
    }

    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn write_tree(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            std::fs::remove_dir_all(dest)?;
        }
        std::fs::create_dir_all(dest)?;
        for (path, content) in self.files.lock().unwrap().iter() {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        Ok(())
    }
}

#[async_trait]
impl GitTransport for FixtureTransport {
    async fn clone_repo(
        &self,
        options: &CloneOptions,
        _channel: &ChannelConnection,
    ) -> Result<String> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        self.write_tree(&options.dest_dir)?;
        Ok(self.commit.lock().unwrap().clone())
    }

    async fn remote_head(
        &self,
        _options: &CloneOptions,
        _channel: &ChannelConnection,
    ) -> Result<String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.commit.lock().unwrap().clone())
    }
}

/// Placement resolving to a fixed cluster list
#[derive(Default)]
pub struct FixedPlacement {
    pub clusters: Vec<String>,
}

#[async_trait]
impl PlacementResolver for FixedPlacement {
    async fn resolve_clusters(&self, _subscription: &Subscription) -> Result<Vec<ClusterName>> {
        Ok(self
            .clusters
            .iter()
            .map(|name| ClusterName { name: name.clone() })
            .collect())
    }
}

/// Hook jobs held in memory
#[derive(Default)]
pub struct MemoryJobs {
    jobs: Mutex<HashMap<NamespacedName, AnsibleJob>>,
    submissions: AtomicUsize,
}

impl MemoryJobs {
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .jobs
            .lock()
            .unwrap()
            .keys()
            .map(ToString::to_string)
            .collect();
        names.sort();
        names
    }

    pub fn job(&self, key: &NamespacedName) -> Option<AnsibleJob> {
        self.jobs.lock().unwrap().get(key).cloned()
    }

    /// Set `status.ansibleJobResult.status` of every stored job
    pub fn finish_all(&self, result: &str) {
        for job in self.jobs.lock().unwrap().values_mut() {
            job.status = Some(AnsibleJobStatus {
                ansible_job_result: Some(AnsibleJobResult {
                    status: Some(result.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
    }
}

#[async_trait]
impl HookJobClient for MemoryJobs {
    async fn get_job(&self, key: &NamespacedName) -> Result<Option<AnsibleJob>> {
        Ok(self.jobs.lock().unwrap().get(key).cloned())
    }

    async fn apply_job(&self, job: &AnsibleJob) -> Result<()> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.jobs
            .lock()
            .unwrap()
            .insert(NamespacedName::from_resource(job), job.clone());
        Ok(())
    }
}
