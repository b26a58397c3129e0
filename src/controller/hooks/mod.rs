//! # Hook Gate
//!
//! Pre and post hooks are `AnsibleJob` templates kept next to a subscription's
//! resources, under `<path>/prehook` and `<path>/posthook`. Pre hooks must
//! report success before the resources are deployed; post hooks run after a
//! successful deployment.
//!
//! ## Lifecycle
//!
//! `Unregistered` → `Registered` (no hooks) → `Registered` (hooks materialized),
//! and back to `Unregistered` on deregistration. Each registered subscription
//! owns one [`Hooks`] record behind its own async lock, so calls for one
//! subscription are serialized while different subscriptions proceed
//! independently.
//!
//! Completion is leveled: callers poll `is_hooks_completed` until it turns true.

mod ledger;
mod template;

pub use ledger::JobInstances;
pub use template::{discover_templates, override_template};

use crate::config::ControllerConfig;
use crate::constants::{HOOK_JOB_COMPLETED, POSTHOOK_DIR, PREHOOK_DIR};
use crate::controller::git::fetch::{build_clone_options, fetch, load_channels, local_repo_dir};
use crate::controller::git::paths::{
    join_within, resolve_relative_path, PathContext, HOOK_PATH_RESOLVERS,
};
use crate::crd::{AnsibleJobsStatus, ClusterName, NamespacedName, Subscription, SubscriptionStatus};
use crate::provider::{GitTransport, HookJobClient, PlacementResolver, SubscriptionStore};
use anyhow::{Context, Result};
use kube::ResourceExt;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, info_span, warn, Instrument};

/// Which side of the deployment a hook runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    Pre,
    Post,
}

impl HookType {
    pub const ALL: [HookType; 2] = [HookType::Pre, HookType::Post];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::Pre => "pre",
            HookType::Post => "post",
        }
    }

    /// Subdirectory of the hook base path holding this side's templates
    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        match self {
            HookType::Pre => PREHOOK_DIR,
            HookType::Post => POSTHOOK_DIR,
        }
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook record of one subscription
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    /// Generation the templates were derived for, `None` until a download succeeds
    generation: Option<i64>,
    pre: JobInstances,
    post: JobInstances,
}

impl Hooks {
    #[must_use]
    pub fn slot(&self, hook_type: HookType) -> &JobInstances {
        match hook_type {
            HookType::Pre => &self.pre,
            HookType::Post => &self.post,
        }
    }

    fn slot_mut(&mut self, hook_type: HookType) -> &mut JobInstances {
        match hook_type {
            HookType::Pre => &mut self.pre,
            HookType::Post => &mut self.post,
        }
    }
}

/// Last applied instance per side, `namespace/name` or empty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedInstance {
    pub pre: String,
    pub post: String,
}

/// Produces the instance name suffix for a subscription revision
pub type SuffixFn = Arc<dyn Fn(&Subscription) -> String + Send + Sync>;

/// Default suffix: `-{generation}-{resourceVersion}`
#[must_use]
pub fn default_suffix(subscription: &Subscription) -> String {
    format!(
        "-{}-{}",
        subscription.metadata.generation.unwrap_or_default(),
        subscription.resource_version().unwrap_or_default()
    )
}

/// Collaborators of the hook registry
#[derive(Clone)]
pub struct HookContext {
    pub store: Arc<dyn SubscriptionStore>,
    pub transport: Arc<dyn GitTransport>,
    pub placement: Arc<dyn PlacementResolver>,
    pub jobs: Arc<dyn HookJobClient>,
    pub config: Arc<ControllerConfig>,
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

type HookEntry = Arc<AsyncMutex<Hooks>>;

/// Keyed store of hook records
pub struct HookRegistry {
    ctx: HookContext,
    entries: Mutex<HashMap<NamespacedName, HookEntry>>,
    suffix_fn: RwLock<SuffixFn>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new(ctx: HookContext) -> Self {
        Self {
            ctx,
            entries: Mutex::new(HashMap::new()),
            suffix_fn: RwLock::new(Arc::new(default_suffix)),
        }
    }

    /// Replace the instance suffix generator
    pub fn set_suffix_fn(&self, suffix_fn: SuffixFn) {
        let mut current = self
            .suffix_fn
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *current = suffix_fn;
    }

    fn suffix_for(&self, subscription: &Subscription) -> String {
        let suffix_fn = self
            .suffix_fn
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        (**suffix_fn)(subscription)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<NamespacedName, HookEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn entry(&self, key: &NamespacedName) -> Option<HookEntry> {
        self.entries().get(key).map(Arc::clone)
    }

    fn entry_or_insert(&self, key: &NamespacedName) -> HookEntry {
        Arc::clone(self.entries().entry(key.clone()).or_default())
    }

    #[must_use]
    pub fn is_registered(&self, key: &NamespacedName) -> bool {
        self.entries().contains_key(key)
    }

    /// Register or refresh the hooks of `key`
    ///
    /// Missing subscriptions or channels and non-Git channels are a no-op, as
    /// is an unchanged generation. A failed download leaves the record without
    /// hooks and without a generation, so the next call retries.
    pub async fn register_subscription(&self, key: &NamespacedName) -> Result<()> {
        let span = info_span!("hook.register", subscription = %key);
        async {
            let Some(subscription) = self.ctx.store.get_subscription(key).await? else {
                debug!("Subscription not found, nothing to register");
                return Ok(());
            };
            let channel_key = subscription.channel_key();
            let Some(channel) = self.ctx.store.get_channel(&channel_key).await? else {
                debug!("Channel {channel_key} not found, nothing to register");
                return Ok(());
            };
            if !channel.is_git() {
                debug!("Channel {channel_key} is not a Git channel");
                return Ok(());
            }

            let entry = self.entry_or_insert(key);
            let mut hooks = entry.lock().await;
            let generation = subscription.metadata.generation;
            if generation.is_some() && hooks.generation == generation {
                debug!("Generation unchanged, hooks already registered");
                return Ok(());
            }

            let repo_root = local_repo_dir(&self.ctx.config.git_root.join("hooks"), key);
            let templates = match self.download_templates(&subscription, &repo_root).await {
                Ok(templates) => templates,
                Err(err) => {
                    *hooks = Hooks {
                        generation: None,
                        pre: JobInstances::continuing(&hooks.pre),
                        post: JobInstances::continuing(&hooks.post),
                    };
                    return Err(err);
                }
            };

            let has_templates = templates.iter().any(|(_, found)| !found.is_empty());
            let clusters = if has_templates {
                self.target_clusters(&subscription).await
            } else {
                Vec::new()
            };

            let suffix = self.suffix_for(&subscription);
            let mut next = Hooks {
                generation,
                pre: JobInstances::continuing(&hooks.pre),
                post: JobInstances::continuing(&hooks.post),
            };
            for (hook_type, found) in templates {
                let slot = next.slot_mut(hook_type);
                for template in &found {
                    let instance = override_template(template, &subscription, &suffix, &clusters);
                    slot.register(&template.name_any(), instance);
                }
                if !found.is_empty() {
                    info!("Registered {} {hook_type} hook templates", found.len());
                }
            }
            *hooks = next;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Fetch the hook repository and discover both sides' templates
    ///
    /// A side whose discovery fails is logged and left empty.
    async fn download_templates(
        &self,
        subscription: &Subscription,
        repo_root: &Path,
    ) -> Result<Vec<(HookType, Vec<crate::crd::AnsibleJob>)>> {
        let store = self.ctx.store.as_ref();
        let channels = load_channels(store, subscription).await?;
        let options =
            build_clone_options(store, subscription, &channels, repo_root.to_path_buf()).await?;
        let commit = fetch(self.ctx.transport.as_ref(), &options)
            .await
            .context("failed to download hook templates")?;
        debug!("Hook repository at commit {commit}");

        let path_ctx = PathContext {
            subscription,
            filter_config: None,
        };
        let relative = resolve_relative_path(HOOK_PATH_RESOLVERS, &path_ctx).map(|(_, path)| path);
        let base = join_within(repo_root, relative.as_deref())?;

        let mut templates = Vec::new();
        for hook_type in HookType::ALL {
            let dir = base.join(hook_type.dir_name());
            let found = match discover_templates(&dir) {
                Ok(found) => found,
                Err(err) => {
                    warn!("Failed to discover {hook_type} hooks in {}: {err:#}", dir.display());
                    Vec::new()
                }
            };
            templates.push((hook_type, found));
        }
        Ok(templates)
    }

    /// Clusters injected into hook jobs of a remote placement
    async fn target_clusters(&self, subscription: &Subscription) -> Vec<ClusterName> {
        let remote = subscription
            .spec
            .placement
            .as_ref()
            .is_some_and(|placement| !placement.is_local());
        if !remote {
            return Vec::new();
        }
        match self.ctx.placement.resolve_clusters(subscription).await {
            Ok(clusters) => clusters,
            Err(err) => {
                warn!("Failed to resolve hook target clusters: {err:#}");
                Vec::new()
            }
        }
    }

    /// Forget the hook record of `key`
    pub fn deregister_subscription(&self, key: &NamespacedName) -> bool {
        let removed = self.entries().remove(key).is_some();
        if removed {
            info!(subscription = %key, "Deregistered hooks");
        }
        removed
    }

    /// Whether the `hook_type` slot of `key` has templates
    pub async fn has_hooks(&self, key: &NamespacedName, hook_type: HookType) -> bool {
        match self.entry(key) {
            Some(entry) => !entry.lock().await.slot(hook_type).is_empty(),
            None => false,
        }
    }

    /// Submit the latest instances of the `hook_type` slot
    pub async fn apply_hooks(&self, key: &NamespacedName, hook_type: HookType) -> Result<()> {
        let Some(entry) = self.entry(key) else {
            return Ok(());
        };
        let span = info_span!("hook", subscription = %key, hook_type = hook_type.as_str());
        async {
            let mut hooks = entry.lock().await;
            let pending: Vec<_> = hooks.slot(hook_type).latest().cloned().collect();
            if pending.is_empty() {
                return Ok(());
            }

            let limit = self.ctx.config.hook_history_limit;
            for job in pending {
                let job_key = NamespacedName::from_resource(&job);
                if self.ctx.jobs.get_job(&job_key).await?.is_some() {
                    debug!("Hook job {job_key} already submitted");
                } else {
                    self.ctx
                        .jobs
                        .apply_job(&job)
                        .await
                        .with_context(|| format!("failed to submit hook job {job_key}"))?;
                    info!("Submitted hook job {job_key}");
                }
                hooks.slot_mut(hook_type).record_applied(job_key, limit);
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Whether every latest instance of the slot reports success
    ///
    /// Unregistered subscriptions and empty slots are complete.
    pub async fn is_hooks_completed(&self, key: &NamespacedName, hook_type: HookType) -> Result<bool> {
        let Some(entry) = self.entry(key) else {
            return Ok(true);
        };
        let hooks = entry.lock().await;
        for job in hooks.slot(hook_type).latest() {
            let job_key = NamespacedName::from_resource(job);
            let status = self
                .ctx
                .jobs
                .get_job(&job_key)
                .await?
                .and_then(|job| job.result_status().map(str::to_string));
            let done = status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(HOOK_JOB_COMPLETED));
            if !done {
                debug!(
                    "{hook_type} hook job {job_key} not completed (status: {})",
                    status.as_deref().unwrap_or("none")
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Last applied instance of each side
    pub async fn last_applied_instance(&self, key: &NamespacedName) -> AppliedInstance {
        let Some(entry) = self.entry(key) else {
            return AppliedInstance::default();
        };
        let hooks = entry.lock().await;
        let last = |hook_type| {
            hooks
                .slot(hook_type)
                .last_applied()
                .map(ToString::to_string)
                .unwrap_or_default()
        };
        AppliedInstance {
            pre: last(HookType::Pre),
            post: last(HookType::Post),
        }
    }

    /// Status of `subscription` with its hook history
    ///
    /// Subscriptions without hooks get their status back unchanged.
    pub async fn append_status_to_subscription(
        &self,
        subscription: &Subscription,
    ) -> SubscriptionStatus {
        let mut status = subscription.status.clone().unwrap_or_default();
        let Some(entry) = self.entry(&subscription.key()) else {
            return status;
        };
        let hooks = entry.lock().await;
        let untouched = |slot: &JobInstances| slot.is_empty() && slot.last_applied().is_none();
        if untouched(&hooks.pre) && untouched(&hooks.post) {
            return status;
        }

        let last = |slot: &JobInstances| {
            slot.last_applied()
                .map(ToString::to_string)
                .unwrap_or_default()
        };
        status.ansiblejobs = Some(AnsibleJobsStatus {
            lastprehookjob: last(&hooks.pre),
            prehookjobshistory: hooks.pre.history(),
            lastposthookjob: last(&hooks.post),
            posthookjobshistory: hooks.post.history(),
        });
        status
    }
}
