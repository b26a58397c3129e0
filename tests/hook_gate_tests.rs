//! Hook gate tests
//!
//! Registration, submission and completion of pre/post hook jobs, and the
//! reconcile pass that holds the sync loop back until pre hooks succeed.

mod common;

use common::{
    git_channel, subscription, FixedPlacement, FixtureTransport, MemoryJobs, MemoryStore,
    RecordingApply,
};
use git_subscription_controller::config::ControllerConfig;
use git_subscription_controller::constants::{
    ANNOTATION_GIT_PATH, ANNOTATION_RECONCILE_RATE, HOOK_TARGET_CLUSTERS_KEY,
};
use git_subscription_controller::controller::git::{GitSubscriber, SyncContext};
use git_subscription_controller::controller::hooks::{HookContext, HookRegistry, HookType};
use git_subscription_controller::controller::reconciler::{reconcile, Reconciler};
use git_subscription_controller::crd::{ClusterName, NamespacedName, Placement, Subscription};
use kube_runtime::controller::Action;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const DEPLOYMENT_YAML: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: frontend
spec:
  replicas: 1
"#;

const PRE_HOOK_YAML: &str = r#"
apiVersion: tower.ansible.com/v1alpha1
kind: AnsibleJob
metadata:
  name: notify
spec:
  job_template_name: notify-team
  extra_vars:
    channel: deploys
"#;

const POST_HOOK_YAML: &str = r#"
apiVersion: tower.ansible.com/v1alpha1
kind: AnsibleJob
metadata:
  name: smoke-test
spec:
  job_template_name: smoke
"#;

struct Harness {
    _root: TempDir,
    store: Arc<MemoryStore>,
    jobs: Arc<MemoryJobs>,
    transport: Arc<FixtureTransport>,
    config: Arc<ControllerConfig>,
    hooks: Arc<HookRegistry>,
}

impl Harness {
    fn new(sub: Subscription, files: &[(&str, &str)], clusters: &[&str]) -> Self {
        let root = TempDir::new().unwrap();
        let config = Arc::new(ControllerConfig {
            git_root: root.path().join("git"),
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::with(sub, git_channel()));
        let jobs = Arc::new(MemoryJobs::default());
        let transport = Arc::new(FixtureTransport::new(files));
        let placement = Arc::new(FixedPlacement {
            clusters: clusters.iter().map(ToString::to_string).collect(),
        });
        let hooks = Arc::new(HookRegistry::new(HookContext {
            store: Arc::clone(&store) as _,
            transport: Arc::clone(&transport) as _,
            placement: placement as _,
            jobs: Arc::clone(&jobs) as _,
            config: Arc::clone(&config),
        }));
        Self {
            _root: root,
            store,
            jobs,
            transport,
            config,
            hooks,
        }
    }

    fn reconciler(&self) -> Arc<Reconciler> {
        let subscriber = Arc::new(GitSubscriber::new(SyncContext {
            store: Arc::clone(&self.store) as _,
            apply: Arc::new(RecordingApply::default()) as _,
            transport: Arc::clone(&self.transport) as _,
            config: Arc::clone(&self.config),
        }));
        Arc::new(Reconciler::new(
            Arc::clone(&self.store) as _,
            subscriber,
            Arc::clone(&self.hooks),
            Arc::clone(&self.config),
        ))
    }
}

fn web() -> Subscription {
    subscription("web", &[(ANNOTATION_GIT_PATH, "deploy")])
}

fn key() -> NamespacedName {
    NamespacedName::new("apps", "web")
}

mod registration_tests {
    use super::*;

    #[tokio::test]
    async fn test_no_hook_directories_is_complete() {
        let harness = Harness::new(web(), &[("deploy/app.yaml", DEPLOYMENT_YAML)], &[]);

        harness.hooks.register_subscription(&key()).await.unwrap();

        assert!(harness.hooks.is_registered(&key()));
        for hook_type in HookType::ALL {
            assert!(!harness.hooks.has_hooks(&key(), hook_type).await);
            assert!(harness.hooks.is_hooks_completed(&key(), hook_type).await.unwrap());
            harness.hooks.apply_hooks(&key(), hook_type).await.unwrap();
            assert!(harness.hooks.is_hooks_completed(&key(), hook_type).await.unwrap());
        }
        assert_eq!(harness.jobs.submissions(), 0);

        let status = harness.hooks.append_status_to_subscription(&web()).await;
        assert_eq!(status.ansiblejobs, None);
    }

    #[tokio::test]
    async fn test_unregistered_subscription_is_complete() {
        let harness = Harness::new(web(), &[], &[]);

        assert!(!harness.hooks.is_registered(&key()));
        assert!(harness
            .hooks
            .is_hooks_completed(&key(), HookType::Pre)
            .await
            .unwrap());
        assert!(!harness.hooks.deregister_subscription(&key()));
    }

    #[tokio::test]
    async fn test_unchanged_generation_is_not_downloaded_again() {
        let files = [("deploy/prehook/notify.yaml", PRE_HOOK_YAML)];
        let harness = Harness::new(web(), &files, &[]);

        harness.hooks.register_subscription(&key()).await.unwrap();
        harness.hooks.register_subscription(&key()).await.unwrap();

        assert_eq!(harness.transport.clone_count(), 1);
        assert!(harness.hooks.has_hooks(&key(), HookType::Pre).await);
        assert!(!harness.hooks.has_hooks(&key(), HookType::Post).await);
    }

    #[tokio::test]
    async fn test_non_git_channel_is_not_registered() {
        let files = [("deploy/prehook/notify.yaml", PRE_HOOK_YAML)];
        let harness = Harness::new(web(), &files, &[]);
        let mut channel = git_channel();
        channel.spec.channel_type = "HelmRepo".to_string();
        harness.store.put_channel(channel);

        harness.hooks.register_subscription(&key()).await.unwrap();

        assert!(!harness.hooks.is_registered(&key()));
        assert_eq!(harness.transport.clone_count(), 0);
        assert!(harness
            .hooks
            .is_hooks_completed(&key(), HookType::Pre)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_deregister_forgets_hooks() {
        let files = [("deploy/prehook/notify.yaml", PRE_HOOK_YAML)];
        let harness = Harness::new(web(), &files, &[]);
        harness.hooks.register_subscription(&key()).await.unwrap();

        assert!(harness.hooks.deregister_subscription(&key()));

        assert!(!harness.hooks.is_registered(&key()));
        assert!(!harness.hooks.has_hooks(&key(), HookType::Pre).await);
        assert!(harness
            .hooks
            .is_hooks_completed(&key(), HookType::Pre)
            .await
            .unwrap());
    }
}

mod gate_tests {
    use super::*;

    #[tokio::test]
    async fn test_pre_gate_opens_when_job_succeeds() {
        let files = [("deploy/prehook/notify.yaml", PRE_HOOK_YAML)];
        let harness = Harness::new(web(), &files, &[]);
        harness.hooks.register_subscription(&key()).await.unwrap();

        assert!(!harness
            .hooks
            .is_hooks_completed(&key(), HookType::Pre)
            .await
            .unwrap());

        harness.hooks.apply_hooks(&key(), HookType::Pre).await.unwrap();
        assert_eq!(harness.jobs.names(), vec!["apps/notify-1-100"]);
        assert!(!harness
            .hooks
            .is_hooks_completed(&key(), HookType::Pre)
            .await
            .unwrap());

        harness.jobs.finish_all("failed");
        assert!(!harness
            .hooks
            .is_hooks_completed(&key(), HookType::Pre)
            .await
            .unwrap());

        harness.jobs.finish_all("Successful");
        assert!(harness
            .hooks
            .is_hooks_completed(&key(), HookType::Pre)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let files = [("deploy/prehook/notify.yaml", PRE_HOOK_YAML)];
        let harness = Harness::new(web(), &files, &[]);
        harness.hooks.register_subscription(&key()).await.unwrap();

        harness.hooks.apply_hooks(&key(), HookType::Pre).await.unwrap();
        harness.hooks.apply_hooks(&key(), HookType::Pre).await.unwrap();

        assert_eq!(harness.jobs.submissions(), 1);
        let status = harness.hooks.append_status_to_subscription(&web()).await;
        let jobs = status.ansiblejobs.unwrap();
        assert_eq!(jobs.lastprehookjob, "apps/notify-1-100");
        assert_eq!(jobs.prehookjobshistory, vec!["apps/notify-1-100"]);
        assert_eq!(jobs.lastposthookjob, "");
        assert!(jobs.posthookjobshistory.is_empty());
    }

    #[tokio::test]
    async fn test_new_generation_appends_to_history() {
        let files = [("deploy/prehook/notify.yaml", PRE_HOOK_YAML)];
        let harness = Harness::new(web(), &files, &[]);
        harness.hooks.register_subscription(&key()).await.unwrap();
        harness.hooks.apply_hooks(&key(), HookType::Pre).await.unwrap();

        let mut updated = web();
        updated.metadata.generation = Some(2);
        updated.metadata.resource_version = Some("200".to_string());
        harness.store.put_subscription(updated.clone());
        harness.hooks.register_subscription(&key()).await.unwrap();
        harness.hooks.apply_hooks(&key(), HookType::Pre).await.unwrap();

        assert_eq!(
            harness.jobs.names(),
            vec!["apps/notify-1-100", "apps/notify-2-200"]
        );
        let applied = harness.hooks.last_applied_instance(&key()).await;
        assert_eq!(applied.pre, "apps/notify-2-200");
        assert_eq!(applied.post, "");

        let status = harness.hooks.append_status_to_subscription(&updated).await;
        assert_eq!(
            status.ansiblejobs.unwrap().prehookjobshistory,
            vec!["apps/notify-1-100", "apps/notify-2-200"]
        );
    }

    #[tokio::test]
    async fn test_suffix_override() {
        let files = [("deploy/posthook/smoke.yaml", POST_HOOK_YAML)];
        let harness = Harness::new(web(), &files, &[]);
        harness
            .hooks
            .set_suffix_fn(Arc::new(|sub: &Subscription| format!("-{}-run", sub.name_str())));

        harness.hooks.register_subscription(&key()).await.unwrap();
        harness.hooks.apply_hooks(&key(), HookType::Post).await.unwrap();

        assert_eq!(harness.jobs.names(), vec!["apps/smoke-test-web-run"]);
        assert_eq!(
            harness.hooks.last_applied_instance(&key()).await.post,
            "apps/smoke-test-web-run"
        );
    }

    #[tokio::test]
    async fn test_remote_placement_injects_target_clusters() {
        let mut sub = web();
        sub.spec.placement = Some(Placement {
            clusters: vec![ClusterName {
                name: "east".to_string(),
            }],
            ..Default::default()
        });
        let files = [("deploy/prehook/notify.yaml", PRE_HOOK_YAML)];
        let harness = Harness::new(sub, &files, &["east", "west"]);

        harness.hooks.register_subscription(&key()).await.unwrap();
        harness.hooks.apply_hooks(&key(), HookType::Pre).await.unwrap();

        let job = harness
            .jobs
            .job(&NamespacedName::new("apps", "notify-1-100"))
            .unwrap();
        let extra_vars = job.spec.extra_vars.unwrap();
        assert_eq!(extra_vars[HOOK_TARGET_CLUSTERS_KEY], json!(["east", "west"]));
        assert_eq!(extra_vars["channel"], json!("deploys"));
    }
}

mod reconcile_tests {
    use super::*;

    fn off_tier() -> Subscription {
        subscription(
            "web",
            &[(ANNOTATION_GIT_PATH, "deploy"), (ANNOTATION_RECONCILE_RATE, "off")],
        )
    }

    #[tokio::test]
    async fn test_sync_loop_waits_for_pre_hooks() {
        let files = [
            ("deploy/app.yaml", DEPLOYMENT_YAML),
            ("deploy/prehook/notify.yaml", PRE_HOOK_YAML),
        ];
        let harness = Harness::new(off_tier(), &files, &[]);
        let ctx = harness.reconciler();

        let action = reconcile(Arc::new(off_tier()), Arc::clone(&ctx))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(harness.config.hook_poll_interval()));
        assert!(!ctx.subscriber.is_tracking(&key()));
        assert_eq!(harness.jobs.names(), vec!["apps/notify-1-100"]);
        let status = harness.store.status_of(&key()).unwrap();
        assert_eq!(
            status.ansiblejobs.unwrap().lastprehookjob,
            "apps/notify-1-100"
        );

        harness.jobs.finish_all("successful");
        let action = reconcile(Arc::new(off_tier()), Arc::clone(&ctx))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(harness.config.resync_interval()));
        assert!(ctx.subscriber.is_tracking(&key()));
        assert_eq!(harness.jobs.submissions(), 1);

        ctx.teardown(&key());
        assert!(!ctx.subscriber.is_tracking(&key()));
        assert!(!harness.hooks.is_registered(&key()));
    }

    #[tokio::test]
    async fn test_missing_channel_requeues() {
        let mut sub = off_tier();
        sub.spec.channel = "apps/missing".to_string();
        let harness = Harness::new(sub.clone(), &[], &[]);
        let ctx = harness.reconciler();

        let action = reconcile(Arc::new(sub), Arc::clone(&ctx)).await.unwrap();

        assert_eq!(action, Action::requeue(harness.config.resync_interval()));
        assert!(!ctx.subscriber.is_tracking(&key()));
        assert!(!harness.hooks.is_registered(&key()));
    }
}
