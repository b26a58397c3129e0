//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Annotation and label keys follow the `apps.open-cluster-management.io`
//! vocabulary so subscriptions authored for the hub keep working unchanged.
//! Tunable values can be overridden via environment variables, see
//! [`crate::config::ControllerConfig`].

/// API group of Subscription, Channel and HelmRelease resources
pub const APPS_GROUP: &str = "apps.open-cluster-management.io";

/// API version of Subscription, Channel and HelmRelease resources
pub const APPS_VERSION: &str = "v1";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "git-subscription-controller";

// Subscription annotations

pub const ANNOTATION_GITHUB_PATH: &str = "apps.open-cluster-management.io/github-path";
pub const ANNOTATION_GIT_PATH: &str = "apps.open-cluster-management.io/git-path";
pub const ANNOTATION_GITHUB_BRANCH: &str = "apps.open-cluster-management.io/github-branch";
pub const ANNOTATION_GIT_BRANCH: &str = "apps.open-cluster-management.io/git-branch";
pub const ANNOTATION_GIT_COMMIT: &str = "apps.open-cluster-management.io/git-desired-commit";
pub const ANNOTATION_GIT_TAG: &str = "apps.open-cluster-management.io/git-tag";
pub const ANNOTATION_GIT_CLONE_DEPTH: &str = "apps.open-cluster-management.io/git-clone-depth";
pub const ANNOTATION_RECONCILE_RATE: &str = "apps.open-cluster-management.io/reconcile-rate";
pub const ANNOTATION_WEBHOOK_ENABLED: &str = "apps.open-cluster-management.io/webhook-enabled";

/// Subscription annotation granting the subscription cluster-wide deployment rights
pub const ANNOTATION_CLUSTER_ADMIN: &str = "apps.open-cluster-management.io/cluster-admin";

/// Forces every namespaced resource into the subscription namespace, even for cluster admins
pub const ANNOTATION_CURRENT_NAMESPACE_SCOPED: &str =
    "apps.open-cluster-management.io/current-namespace-scoped";

/// Per-resource reconcile option (`merge`, `replace`, `mergeAndOwn`)
pub const ANNOTATION_RESOURCE_RECONCILE_OPTION: &str =
    "apps.open-cluster-management.io/reconcile-option";

/// Stamped on hook jobs, value is `namespace/name` of the owning subscription
pub const ANNOTATION_HOSTING_SUBSCRIPTION: &str =
    "apps.open-cluster-management.io/hosting-subscription";

pub const ANNOTATION_USER_IDENTITY: &str = "apps.open-cluster-management.io/user-identity";
pub const ANNOTATION_USER_GROUP: &str = "apps.open-cluster-management.io/user-group";

/// Default reconcile option stamped on deployed resources
pub const RECONCILE_OPTION_MERGE: &str = "merge";

// Labels

/// Subscriptions labelled `subscription-pause=true` skip periodic ticks
pub const LABEL_SUBSCRIPTION_PAUSE: &str = "apps.open-cluster-management.io/subscription-pause";

pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

pub const LABEL_APP: &str = "app";

// Channel secret and config map keys

pub const SECRET_KEY_USER: &str = "user";
pub const SECRET_KEY_ACCESS_TOKEN: &str = "accessToken";
pub const SECRET_KEY_SSH_KEY: &str = "sshKey";
pub const SECRET_KEY_PASSPHRASE: &str = "passphrase";
pub const SECRET_KEY_CLIENT_KEY: &str = "clientKey";
pub const SECRET_KEY_CLIENT_CERT: &str = "clientCert";
pub const CONFIG_MAP_KEY_CA_CERTS: &str = "caCerts";

/// Key of the package filter config map holding the resource path
pub const CONFIG_MAP_KEY_PATH: &str = "path";

// Hooks

pub const PREHOOK_DIR: &str = "prehook";
pub const POSTHOOK_DIR: &str = "posthook";

/// Status reported by a hook job that finished successfully (compared case-insensitively)
pub const HOOK_JOB_COMPLETED: &str = "successful";

pub const ANSIBLE_JOB_GROUP: &str = "tower.ansible.com";
pub const ANSIBLE_JOB_VERSION: &str = "v1alpha1";
pub const ANSIBLE_JOB_KIND: &str = "AnsibleJob";

/// Key injected into a hook job's `extra_vars` with the target cluster names
pub const HOOK_TARGET_CLUSTERS_KEY: &str = "target_clusters";

// Defaults

/// Root directory for clone working copies
pub const DEFAULT_GIT_ROOT_PATH: &str = "/tmp/appsub-git";

/// Default shallow clone depth
pub const DEFAULT_CLONE_DEPTH: u32 = 1;

/// Ticks after a full resync before a medium-tier subscription forces another one
pub const DEFAULT_FORCED_RESYNC_TICKS: u32 = 6;

/// Number of applied hook instances exposed in subscription status
pub const DEFAULT_HOOK_HISTORY_LIMIT: usize = 5;

/// Requeue interval while a hook gate is still open (seconds)
pub const DEFAULT_HOOK_POLL_INTERVAL_SECS: u64 = 30;

/// Steady-state requeue interval of the subscription reconcile (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Maximum length of a subscription status message
pub const DEFAULT_STATUS_MESSAGE_MAX_LEN: usize = 2000;

/// Default minimum and maximum Fibonacci backoff for reconcile errors (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

pub const DEFAULT_KUSTOMIZE_BINARY: &str = "kustomize";
pub const DEFAULT_GIT_BINARY: &str = "git";
