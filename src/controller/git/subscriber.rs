//! # Subscriber Item
//!
//! Per-subscription sync state and the body of one sync tick:
//! drift check, fetch, classification, transformation and the hand-off to the
//! apply engine.
//!
//! ## Apply order
//!
//! CRDs and namespaces, then RBAC, then other manifests, then kustomize
//! output, then Helm releases.
//!
//! The classified buckets and the pending resource list only live for one
//! tick; they are cleared whatever the outcome.

use crate::config::ControllerConfig;
use crate::controller::git::classify::{classify, ResourceBuckets, SkipPolicy};
use crate::controller::git::error::{truncate_message, SyncError};
use crate::controller::git::fetch::{
    build_clone_options, fetch, load_channels, local_repo_dir, remote_head, CloneOptions,
};
use crate::controller::git::helm::{generate_index, helm_release_manifest, HelmIndex};
use crate::controller::git::kustomize::{self, apply_kustomize_overrides, relative_root};
use crate::controller::git::paths::{
    join_within, resolve_relative_path, PathContext, RESOURCE_PATH_RESOLVERS,
};
use crate::controller::git::schedule::{DriftDetector, ReconcileRate, ResyncReason, SyncDecision};
use crate::controller::git::time_window;
use crate::controller::git::transform::{
    transform_manifest, transform_value, ManifestOrigin, TransformContext, Transformed,
};
use crate::crd::{NamespacedName, Subscription, SubscriptionPhase, SubscriptionStatus};
use crate::provider::{ApplyEngine, GitTransport, ResourceUnit, SubscriptionStore};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Collaborators shared by every subscriber
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn SubscriptionStore>,
    pub apply: Arc<dyn ApplyEngine>,
    pub transport: Arc<dyn GitTransport>,
    pub config: Arc<ControllerConfig>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// What triggered a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTrigger {
    /// First run after `start`, retried on failure
    Initial,
    /// Scheduled by the tier period
    Periodic,
    /// External trigger such as a webhook event; never gated
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TimeWindow,
    Paused,
    /// Webhook-driven subscription whose last tick succeeded
    AwaitingWebhook,
    UnchangedCommit,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TimeWindow => "time-window",
            SkipReason::Paused => "paused",
            SkipReason::AwaitingWebhook => "awaiting-webhook",
            SkipReason::UnchangedCommit => "unchanged-commit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Applied { resources: usize, commit: String },
    Skipped(SkipReason),
}

/// Runtime state of one subscription's sync loop
#[derive(Debug)]
pub struct SubscriberItem {
    key: NamespacedName,
    subscription: Subscription,
    rate: ReconcileRate,
    repo_root: PathBuf,
    last_commit: Option<String>,
    drift: DriftDetector,
    successful: bool,
    buckets: ResourceBuckets,
    helm_index: Option<HelmIndex>,
    resources: Vec<ResourceUnit>,
}

impl SubscriberItem {
    #[must_use]
    pub fn new(subscription: Subscription, config: &ControllerConfig) -> Self {
        let key = subscription.key();
        let rate = ReconcileRate::from_annotation(
            subscription.annotation(crate::constants::ANNOTATION_RECONCILE_RATE),
        );
        Self {
            repo_root: local_repo_dir(&config.git_root, &key),
            key,
            subscription,
            rate,
            last_commit: None,
            drift: DriftDetector::new(config.forced_resync_ticks),
            successful: false,
            buckets: ResourceBuckets::default(),
            helm_index: None,
            resources: Vec::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &NamespacedName {
        &self.key
    }

    #[must_use]
    pub fn rate(&self) -> ReconcileRate {
        self.rate
    }

    #[must_use]
    pub fn last_commit(&self) -> Option<&str> {
        self.last_commit.as_deref()
    }

    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.successful
    }

    #[must_use]
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Whether `trigger` is subject to time window and pause gating
    ///
    /// Periodic ticks always are, and so is the first run of a periodic tier.
    /// The `off` tier's single run and manual triggers bypass the gate.
    #[must_use]
    pub fn is_gated(&self, trigger: TickTrigger) -> bool {
        match trigger {
            TickTrigger::Periodic => true,
            TickTrigger::Initial => self.rate != ReconcileRate::Off,
            TickTrigger::Manual => false,
        }
    }

    /// Time window and pause gating
    #[must_use]
    pub fn gate(&self, now: DateTime<Utc>) -> Option<SkipReason> {
        if let Some(window) = &self.subscription.spec.time_window {
            if time_window::is_excluded(window, now) {
                info!(subscription = %self.key, "Subscription is blocked by its time window");
                return Some(SkipReason::TimeWindow);
            }
        }
        if self.subscription.is_paused() {
            info!(subscription = %self.key, "Subscription is paused");
            return Some(SkipReason::Paused);
        }
        None
    }

    /// Run one tick and clear the transient buckets afterwards
    pub async fn do_subscription(
        &mut self,
        ctx: &SyncContext,
        trigger: TickTrigger,
    ) -> Result<TickOutcome, SyncError> {
        let span = info_span!(
            "sync_tick",
            subscription = %self.key,
            tier = self.rate.as_str(),
            commit = tracing::field::Empty
        );
        let result = self.sync(ctx, trigger).instrument(span).await;

        self.buckets.clear();
        self.helm_index = None;
        self.resources.clear();

        if let Err(err) = &result {
            if !err.is_not_found() {
                self.successful = false;
            }
        }
        result
    }

    async fn sync(
        &mut self,
        ctx: &SyncContext,
        trigger: TickTrigger,
    ) -> Result<TickOutcome, SyncError> {
        self.subscription = ctx
            .store
            .get_subscription(&self.key)
            .await
            .map_err(|err| SyncError::Fetch(format!("failed to read subscription: {err:#}")))?
            .ok_or_else(|| SyncError::NotFound(format!("subscription {}", self.key)))?;

        if self.is_gated(trigger) {
            if let Some(reason) = self.gate(Utc::now()) {
                return Ok(TickOutcome::Skipped(reason));
            }
        }

        // A manual trigger is the webhook event itself
        if trigger != TickTrigger::Manual
            && self.subscription.is_webhook_enabled()
            && self.successful
        {
            info!("Webhook enabled and last tick succeeded, waiting for the next event");
            return Ok(TickOutcome::Skipped(SkipReason::AwaitingWebhook));
        }

        let channels = load_channels(ctx.store.as_ref(), &self.subscription).await?;
        let options = build_clone_options(
            ctx.store.as_ref(),
            &self.subscription,
            &channels,
            self.repo_root.clone(),
        )
        .await
        .map_err(|err| SyncError::Fetch(format!("{err:#}")))?;

        let reason = match self.drift_decision(ctx.transport.as_ref(), &options).await {
            SyncDecision::Skip => {
                info!(
                    "Commit {} unchanged, skipping tick",
                    self.last_commit.as_deref().unwrap_or_default()
                );
                return Ok(TickOutcome::Skipped(SkipReason::UnchangedCommit));
            }
            SyncDecision::FullResync(reason) => reason,
        };

        let commit = fetch(ctx.transport.as_ref(), &options).await.map_err(|err| {
            SyncError::Fetch(format!(
                "failed to clone {}: {err:#}",
                options.primary.url
            ))
        })?;
        tracing::Span::current().record("commit", commit.as_str());
        info!(reason = reason.as_str(), "Full resync at commit {commit}");

        let count = self.build_and_apply(ctx, &options).await?;
        self.last_commit = Some(commit.clone());
        Ok(TickOutcome::Applied {
            resources: count,
            commit,
        })
    }

    /// Skip or resync; only the medium tier may skip
    async fn drift_decision(
        &mut self,
        transport: &dyn GitTransport,
        options: &CloneOptions,
    ) -> SyncDecision {
        if !self.rate.skips_unchanged_commits() {
            return SyncDecision::FullResync(ResyncReason::EveryTick);
        }
        if self.last_commit.is_none() {
            return self.drift.evaluate(None, "", self.successful);
        }
        match remote_head(transport, options).await {
            Ok(head) => self
                .drift
                .evaluate(self.last_commit.as_deref(), &head, self.successful),
            Err(err) => {
                warn!("Failed to probe remote head, resyncing: {err:#}");
                self.drift.reset();
                SyncDecision::FullResync(ResyncReason::NewCommit)
            }
        }
    }

    async fn build_and_apply(
        &mut self,
        ctx: &SyncContext,
        options: &CloneOptions,
    ) -> Result<usize, SyncError> {
        let resource_path = self.resource_path(ctx).await?;
        self.buckets = classify(&self.repo_root, &resource_path, SkipPolicy::SkipHookDirectories)
            .map_err(|err| SyncError::Classification(format!("{err:#}")))?;

        let mut tick_successful = self.successful;
        let mut bucket_errors: Vec<String> = Vec::new();
        let mut resource_errors: Vec<String> = Vec::new();

        match generate_index(&self.subscription, &self.repo_root, &self.buckets.chart_dirs) {
            Ok(index) => self.helm_index = Some(index),
            Err(err) => {
                error!("Failed to generate helm index: {err:#}");
                tick_successful = false;
                bucket_errors.push(format!("failed to generate helm index: {err:#}"));
            }
        }

        let transform_ctx = TransformContext {
            subscription: &self.subscription,
            apply: ctx.apply.as_ref(),
        };

        let documents = self
            .buckets
            .crds_and_namespaces
            .iter()
            .chain(&self.buckets.rbac)
            .chain(&self.buckets.other);
        for document in documents {
            match transform_manifest(&document.content, &transform_ctx, ManifestOrigin::File) {
                Ok(Transformed::Resource(unit)) => self.resources.push(unit),
                Ok(Transformed::Skipped(reason)) => {
                    debug!("Skipping {}#{}: {reason}", document.path.display(), document.index);
                }
                Err(err) => {
                    warn!("Dropping {}#{}: {err:#}", document.path.display(), document.index);
                    resource_errors.push(format!("{err:#}"));
                }
            }
        }

        for dir in &self.buckets.kustomize_dirs {
            info!("Applying kustomization {}", dir.display());
            let relative = relative_root(&self.repo_root, dir);
            let rendered = match apply_kustomize_overrides(
                &self.subscription.spec.package_overrides,
                &relative,
                dir,
            ) {
                Ok(_) => kustomize::build(&ctx.config.kustomize_binary, dir).await,
                Err(err) => Err(err),
            };

            let documents = match rendered {
                Ok(documents) => documents,
                Err(err) => {
                    error!("Failed to apply kustomization, dropping every pending resource: {err:#}");
                    self.resources.clear();
                    let mut message = format!("{err:#}");
                    for other in &bucket_errors {
                        message.push_str(", ");
                        message.push_str(other);
                    }
                    let err = SyncError::KustomizeBuild(message);
                    let status_message =
                        truncate_message(&err.to_string(), ctx.config.status_message_max_len);
                    if let Err(status_err) = ctx
                        .apply
                        .update_appsub_overall_status(&self.subscription, true, &status_message)
                        .await
                    {
                        error!("Unable to update subscription overall status: {status_err:#}");
                    }
                    return Err(err);
                }
            };

            for document in documents {
                match transform_manifest(&document, &transform_ctx, ManifestOrigin::Kustomize) {
                    Ok(Transformed::Resource(unit)) => self.resources.push(unit),
                    Ok(Transformed::Skipped(reason)) => debug!("Skipping kustomize output: {reason}"),
                    Err(err) => {
                        warn!("Dropping kustomize output: {err:#}");
                        resource_errors.push(format!("{err:#}"));
                    }
                }
            }
        }

        if let Some(index) = &self.helm_index {
            for chart in index.values().filter_map(|versions| versions.last()) {
                let manifest = helm_release_manifest(&self.subscription, chart, options);
                match transform_value(manifest, &transform_ctx, ManifestOrigin::Helm) {
                    Ok(Transformed::Resource(unit)) => self.resources.push(unit),
                    Ok(Transformed::Skipped(reason)) => {
                        debug!("Skipping helm release for {}: {reason}", chart.name);
                    }
                    Err(err) => {
                        warn!("Dropping helm release for {}: {err:#}", chart.name);
                        resource_errors.push(format!("{err:#}"));
                    }
                }
            }
        }

        if self.resources.is_empty() && !tick_successful {
            let mut messages = bucket_errors;
            messages.extend(resource_errors);
            if messages.is_empty() {
                messages.push(format!(
                    "no deployable resources found in {}",
                    relative_root(&self.repo_root, &resource_path)
                ));
            }
            error!("No resources to apply, keeping the previously deployed set");
            return Err(SyncError::EmptyResourceSet(truncate_message(
                &messages.join(", "),
                ctx.config.status_message_max_len,
            )));
        }

        let count = self.resources.len();
        let resources = std::mem::take(&mut self.resources);
        let spec = &self.subscription.spec;
        ctx.apply
            .process_sub_resources(
                &self.subscription,
                resources,
                &spec.allow,
                &spec.deny,
                self.subscription.is_cluster_admin(),
                false,
            )
            .await
            .map_err(|err| SyncError::Apply(format!("{err:#}")))?;
        info!("Handed {count} resources to the apply engine");

        if bucket_errors.is_empty() {
            self.successful = true;
            Ok(count)
        } else {
            Err(SyncError::Classification(truncate_message(
                &bucket_errors.join(", "),
                ctx.config.status_message_max_len,
            )))
        }
    }

    async fn resource_path(&self, ctx: &SyncContext) -> Result<PathBuf, SyncError> {
        let filter_config = match self
            .subscription
            .spec
            .package_filter
            .as_ref()
            .and_then(|f| f.filter_ref.as_ref())
        {
            Some(reference) => {
                let key = reference.key(self.subscription.namespace_str());
                match ctx.store.get_config_map(&key).await {
                    Ok(config_map) => config_map,
                    Err(err) => {
                        error!("Failed to get filterRef config map {key}: {err:#}");
                        None
                    }
                }
            }
            None => None,
        };

        let path_ctx = PathContext {
            subscription: &self.subscription,
            filter_config: filter_config.as_ref(),
        };
        let relative = resolve_relative_path(RESOURCE_PATH_RESOLVERS, &path_ctx).map(
            |(source, path)| {
                debug!("Resource path {path} from {source}");
                path
            },
        );
        join_within(&self.repo_root, relative.as_deref())
            .map_err(|err| SyncError::Classification(format!("{err:#}")))
    }
}

/// Status written after a tick, `None` when the tick leaves status untouched
#[must_use]
pub fn status_for(
    result: &Result<TickOutcome, SyncError>,
    max_message_len: usize,
    now: DateTime<Utc>,
) -> Option<SubscriptionStatus> {
    let (phase, message) = match result {
        Ok(TickOutcome::Applied { .. }) => (SubscriptionPhase::Subscribed, String::new()),
        Ok(TickOutcome::Skipped(_)) => return None,
        Err(err) if err.is_not_found() => return None,
        Err(err) => (
            SubscriptionPhase::Failed,
            truncate_message(&err.to_string(), max_message_len),
        ),
    };
    Some(SubscriptionStatus {
        phase: Some(phase.as_str().to_string()),
        message: Some(message),
        last_update_time: Some(now.to_rfc3339()),
        ansiblejobs: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ANNOTATION_RECONCILE_RATE;
    use crate::crd::{HourRange, SubscriptionSpec, TimeWindow};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn subscription(annotations: &[(&str, &str)]) -> Subscription {
        let mut sub = Subscription::new("web", SubscriptionSpec::default());
        sub.metadata.namespace = Some("apps".to_string());
        sub.metadata.annotations = Some(
            annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        sub
    }

    mod item_tests {
        use super::*;

        #[test]
        fn test_rate_and_repo_root() {
            let config = ControllerConfig::default();
            let item = SubscriberItem::new(subscription(&[(ANNOTATION_RECONCILE_RATE, "high")]), &config);
            assert_eq!(item.rate(), ReconcileRate::High);
            assert!(item.repo_root().starts_with(&config.git_root));
            assert!(!item.is_successful());
            assert_eq!(item.last_commit(), None);
        }

        #[test]
        fn test_gate_pause_label() {
            let mut sub = subscription(&[]);
            sub.metadata.labels = Some(BTreeMap::from([(
                crate::constants::LABEL_SUBSCRIPTION_PAUSE.to_string(),
                "true".to_string(),
            )]));
            let item = SubscriberItem::new(sub, &ControllerConfig::default());
            assert_eq!(item.gate(Utc::now()), Some(SkipReason::Paused));
        }

        #[test]
        fn test_gate_time_window() {
            let mut sub = subscription(&[]);
            sub.spec.time_window = Some(TimeWindow {
                window_type: Some("blocked".to_string()),
                hours: vec![HourRange {
                    start: "00:00".to_string(),
                    end: "23:59".to_string(),
                }],
                ..TimeWindow::default()
            });
            let item = SubscriberItem::new(sub, &ControllerConfig::default());
            let noon = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
            assert_eq!(item.gate(noon), Some(SkipReason::TimeWindow));
        }

        #[test]
        fn test_gated_triggers_per_tier() {
            let config = ControllerConfig::default();
            let medium = SubscriberItem::new(subscription(&[]), &config);
            assert!(medium.is_gated(TickTrigger::Initial));
            assert!(medium.is_gated(TickTrigger::Periodic));
            assert!(!medium.is_gated(TickTrigger::Manual));

            let off = SubscriberItem::new(subscription(&[(ANNOTATION_RECONCILE_RATE, "off")]), &config);
            assert!(!off.is_gated(TickTrigger::Initial));
            assert!(!off.is_gated(TickTrigger::Manual));
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn test_status_for_outcomes() {
            let now = Utc::now();
            let applied: Result<TickOutcome, SyncError> = Ok(TickOutcome::Applied {
                resources: 3,
                commit: "abc".to_string(),
            });
            let status = status_for(&applied, 2000, now).unwrap();
            assert_eq!(status.phase.as_deref(), Some("Subscribed"));
            assert_eq!(status.message.as_deref(), Some(""));

            let skipped: Result<TickOutcome, SyncError> =
                Ok(TickOutcome::Skipped(SkipReason::UnchangedCommit));
            assert!(status_for(&skipped, 2000, now).is_none());

            let missing: Result<TickOutcome, SyncError> =
                Err(SyncError::NotFound("subscription apps/web".to_string()));
            assert!(status_for(&missing, 2000, now).is_none());

            let failed: Result<TickOutcome, SyncError> = Err(SyncError::Fetch("x".repeat(50)));
            let status = status_for(&failed, 10, now).unwrap();
            assert_eq!(status.phase.as_deref(), Some("Failed"));
            assert_eq!(status.message.map(|m| m.len()), Some(10));
        }
    }
}
