//! # Repository Fetcher
//!
//! Builds clone options for a subscription and fetches its repository,
//! falling back to the secondary channel when the primary one fails.
//!
//! Working copies live at `{git_root}/{namespace}/{name}/{hash}` where the
//! hash is derived from the subscription identity, so each subscription owns
//! exactly one directory that is overwritten on every fetch.

use crate::constants::{
    ANNOTATION_GITHUB_BRANCH, ANNOTATION_GIT_BRANCH, ANNOTATION_GIT_CLONE_DEPTH,
    ANNOTATION_GIT_COMMIT, ANNOTATION_GIT_TAG, DEFAULT_CLONE_DEPTH,
};
use crate::controller::git::connection::{resolve_connection, ConnectionConfig};
use crate::controller::git::error::SyncError;
use crate::crd::{Channel, NamespacedName, Subscription};
use crate::provider::{GitTransport, SubscriptionStore};
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Ref to check out. Commit beats tag, tag beats branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Commit(String),
    Tag(String),
    Branch(String),
    /// Whatever the remote HEAD points at
    DefaultBranch,
}

impl GitRef {
    #[must_use]
    pub fn for_subscription(subscription: &Subscription) -> Self {
        let non_empty = |key: &str| {
            subscription
                .annotation(key)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        if let Some(commit) = non_empty(ANNOTATION_GIT_COMMIT) {
            GitRef::Commit(commit)
        } else if let Some(tag) = non_empty(ANNOTATION_GIT_TAG) {
            GitRef::Tag(tag)
        } else if let Some(branch) =
            non_empty(ANNOTATION_GITHUB_BRANCH).or_else(|| non_empty(ANNOTATION_GIT_BRANCH))
        {
            GitRef::Branch(branch)
        } else {
            GitRef::DefaultBranch
        }
    }

    /// Branch name, when the ref is a branch
    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        match self {
            GitRef::Branch(branch) => Some(branch),
            _ => None,
        }
    }
}

impl fmt::Display for GitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitRef::Commit(commit) => write!(f, "commit {commit}"),
            GitRef::Tag(tag) => write!(f, "tag {tag}"),
            GitRef::Branch(branch) => write!(f, "branch {branch}"),
            GitRef::DefaultBranch => write!(f, "default branch"),
        }
    }
}

/// Repository URL plus the credentials to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConnection {
    pub url: String,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneOptions {
    pub git_ref: GitRef,
    pub depth: u32,
    pub dest_dir: PathBuf,
    pub primary: ChannelConnection,
    pub secondary: Option<ChannelConnection>,
}

impl CloneOptions {
    /// Connections in the order they are tried
    pub fn connections(&self) -> impl Iterator<Item = &ChannelConnection> {
        std::iter::once(&self.primary).chain(self.secondary.as_ref())
    }
}

/// Parse the `git-clone-depth` annotation; invalid values fall back to the default
#[must_use]
pub fn clone_depth(subscription: &Subscription) -> u32 {
    let Some(raw) = subscription
        .annotation(ANNOTATION_GIT_CLONE_DEPTH)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return DEFAULT_CLONE_DEPTH;
    };

    match raw.parse::<u32>() {
        Ok(depth) if depth > 0 => depth,
        _ => {
            warn!(
                subscription = %subscription.key(),
                "Invalid git-clone-depth '{raw}', using {DEFAULT_CLONE_DEPTH}"
            );
            DEFAULT_CLONE_DEPTH
        }
    }
}

/// Sanitize a string for use as a single path component
#[must_use]
pub fn sanitize_path_component(s: &str) -> String {
    s.replace(['@', '/', ':', '\\', ' ', '\t', '\n', '\r'], "-")
        .replace("..", "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

/// Working copy directory of `key` below `root`
#[must_use]
pub fn local_repo_dir(root: &Path, key: &NamespacedName) -> PathBuf {
    let hash = format!("{:x}", md5::compute(key.to_string()));
    root.join(sanitize_path_component(&key.namespace))
        .join(sanitize_path_component(&key.name))
        .join(hash)
}

/// Resolve a channel's URL and credentials
///
/// A missing secret or config map means anonymous access.
pub async fn channel_connection(
    store: &dyn SubscriptionStore,
    channel: &Channel,
) -> Result<ChannelConnection> {
    let namespace = channel.namespace_str();

    let secret = match &channel.spec.secret_ref {
        Some(reference) => {
            let key = reference.key(namespace);
            let secret = store
                .get_secret(&key)
                .await
                .with_context(|| format!("failed to read channel secret {key}"))?;
            if secret.is_none() {
                warn!("Channel secret {key} not found, using anonymous access");
            }
            secret
        }
        None => None,
    };

    let config_map = match &channel.spec.config_map_ref {
        Some(reference) => {
            let key = reference.key(namespace);
            let config_map = store
                .get_config_map(&key)
                .await
                .with_context(|| format!("failed to read channel config map {key}"))?;
            if config_map.is_none() {
                warn!("Channel config map {key} not found, using system CA bundle");
            }
            config_map
        }
        None => None,
    };

    let connection = resolve_connection(secret.as_ref(), config_map.as_ref())
        .with_context(|| format!("invalid connection settings for channel {}", channel.key()))?
        .with_insecure_skip_verify(channel.spec.insecure_skip_verify);

    Ok(ChannelConnection {
        url: channel.spec.pathname.clone(),
        connection,
    })
}

/// Channels referenced by a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionChannels {
    pub primary: Channel,
    pub secondary: Option<Channel>,
}

/// Load the primary and secondary channels; a missing one is `NotFound`
pub async fn load_channels(
    store: &dyn SubscriptionStore,
    subscription: &Subscription,
) -> Result<SubscriptionChannels, SyncError> {
    let primary_key = subscription.channel_key();
    let primary = store
        .get_channel(&primary_key)
        .await
        .map_err(|err| SyncError::Fetch(format!("failed to read channel {primary_key}: {err:#}")))?
        .ok_or_else(|| SyncError::NotFound(format!("channel {primary_key}")))?;

    let secondary = match subscription.secondary_channel_key() {
        Some(key) => Some(
            store
                .get_channel(&key)
                .await
                .map_err(|err| SyncError::Fetch(format!("failed to read channel {key}: {err:#}")))?
                .ok_or_else(|| SyncError::NotFound(format!("secondary channel {key}")))?,
        ),
        None => None,
    };

    Ok(SubscriptionChannels { primary, secondary })
}

/// Clone options for `subscription`, checking out into `dest_dir`
pub async fn build_clone_options(
    store: &dyn SubscriptionStore,
    subscription: &Subscription,
    channels: &SubscriptionChannels,
    dest_dir: PathBuf,
) -> Result<CloneOptions> {
    let primary = channel_connection(store, &channels.primary).await?;
    let secondary = match &channels.secondary {
        Some(channel) => Some(channel_connection(store, channel).await?),
        None => None,
    };

    Ok(CloneOptions {
        git_ref: GitRef::for_subscription(subscription),
        depth: clone_depth(subscription),
        dest_dir,
        primary,
        secondary,
    })
}

/// Fetch the repository, trying the secondary channel when the primary fails
///
/// Returns the checked-out commit. When every connection fails the last error
/// is returned unmodified.
pub async fn fetch(transport: &dyn GitTransport, options: &CloneOptions) -> Result<String> {
    let mut last_error = None;
    for channel in options.connections() {
        info!(
            "Cloning {} ({}, depth {}) into {}",
            channel.url,
            options.git_ref,
            options.depth,
            options.dest_dir.display()
        );
        match transport.clone_repo(options, channel).await {
            Ok(commit) => {
                debug!("Checked out commit {commit} from {}", channel.url);
                return Ok(commit);
            }
            Err(err) => {
                warn!("Failed to clone {}: {err:#}", channel.url);
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no channel connection to clone from")))
}

/// Commit the requested ref points at remotely, without cloning
///
/// A pinned commit is its own remote head.
pub async fn remote_head(transport: &dyn GitTransport, options: &CloneOptions) -> Result<String> {
    if let GitRef::Commit(commit) = &options.git_ref {
        return Ok(commit.clone());
    }

    let mut last_error = None;
    for channel in options.connections() {
        match transport.remote_head(options, channel).await {
            Ok(commit) => return Ok(commit),
            Err(err) => {
                debug!("Failed to probe {}: {err:#}", channel.url);
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no channel connection to probe")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SubscriptionSpec;
    use async_trait::async_trait;
    use std::sync::Mutex;

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

    fn options(secondary: bool) -> CloneOptions {
        let connection = |url: &str| ChannelConnection {
            url: url.to_string(),
            connection: ConnectionConfig::default(),
        };
        CloneOptions {
            git_ref: GitRef::Branch("main".to_string()),
            depth: 1,
            dest_dir: PathBuf::from("/tmp/repo"),
            primary: connection("https://primary.example.com/repo.git"),
            secondary: secondary.then(|| connection("https://secondary.example.com/repo.git")),
        }
    }

    /// Fails for URLs listed in `failing`
    struct FlakyTransport {
        failing: Vec<&'static str>,
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GitTransport for FlakyTransport {
        async fn clone_repo(
            &self,
            _options: &CloneOptions,
            channel: &ChannelConnection,
        ) -> Result<String> {
            self.attempts.lock().unwrap().push(channel.url.clone());
            if self.failing.iter().any(|url| channel.url.contains(url)) {
                Err(anyhow::anyhow!("unreachable: {}", channel.url))
            } else {
                Ok("abc123".to_string())
            }
        }

        async fn remote_head(
            &self,
            options: &CloneOptions,
            channel: &ChannelConnection,
        ) -> Result<String> {
            self.clone_repo(options, channel).await
        }
    }

    mod ref_tests {
        use super::*;

        #[test]
        fn test_commit_beats_tag_beats_branch() {
            let sub = subscription(&[
                (ANNOTATION_GIT_BRANCH, "main"),
                (ANNOTATION_GIT_TAG, "v1"),
                (ANNOTATION_GIT_COMMIT, "deadbeef"),
            ]);
            assert_eq!(
                GitRef::for_subscription(&sub),
                GitRef::Commit("deadbeef".to_string())
            );

            let sub = subscription(&[(ANNOTATION_GIT_BRANCH, "main"), (ANNOTATION_GIT_TAG, "v1")]);
            assert_eq!(GitRef::for_subscription(&sub), GitRef::Tag("v1".to_string()));

            let sub = subscription(&[(ANNOTATION_GIT_BRANCH, "release")]);
            assert_eq!(GitRef::for_subscription(&sub).branch(), Some("release"));

            assert_eq!(
                GitRef::for_subscription(&subscription(&[])),
                GitRef::DefaultBranch
            );
        }

        #[test]
        fn test_clone_depth() {
            assert_eq!(clone_depth(&subscription(&[])), 1);
            assert_eq!(
                clone_depth(&subscription(&[(ANNOTATION_GIT_CLONE_DEPTH, "20")])),
                20
            );
            assert_eq!(
                clone_depth(&subscription(&[(ANNOTATION_GIT_CLONE_DEPTH, "deep")])),
                1
            );
            assert_eq!(
                clone_depth(&subscription(&[(ANNOTATION_GIT_CLONE_DEPTH, "0")])),
                1
            );
        }
    }

    mod dir_tests {
        use super::*;

        #[test]
        fn test_local_repo_dir_is_stable_and_sanitized() {
            let key = NamespacedName::new("team a", "../web");
            let first = local_repo_dir(Path::new("/git"), &key);
            let second = local_repo_dir(Path::new("/git"), &key);
            assert_eq!(first, second);
            assert_eq!(first.parent(), Some(Path::new("/git/team-a/--web")));
            assert_ne!(
                first,
                local_repo_dir(Path::new("/git"), &NamespacedName::new("team a", "api"))
            );
        }

        #[test]
        fn test_sanitize_path_component() {
            assert_eq!(sanitize_path_component("a/b:c@d"), "a-b-c-d");
            assert_eq!(sanitize_path_component(".."), "-");
            assert_eq!(sanitize_path_component("../web"), "--web");
        }
    }

    mod fetch_tests {
        use super::*;

        #[tokio::test]
        async fn test_primary_success() {
            let transport = FlakyTransport {
                failing: vec![],
                attempts: Mutex::new(vec![]),
            };
            assert_eq!(fetch(&transport, &options(true)).await.unwrap(), "abc123");
            assert_eq!(transport.attempts.lock().unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_secondary_fallback() {
            let transport = FlakyTransport {
                failing: vec!["primary"],
                attempts: Mutex::new(vec![]),
            };
            assert_eq!(fetch(&transport, &options(true)).await.unwrap(), "abc123");
            assert_eq!(transport.attempts.lock().unwrap().len(), 2);
        }

        #[tokio::test]
        async fn test_last_error_surfaces() {
            let transport = FlakyTransport {
                failing: vec!["primary", "secondary"],
                attempts: Mutex::new(vec![]),
            };
            let err = fetch(&transport, &options(true)).await.unwrap_err();
            assert!(err.to_string().contains("secondary"));
        }

        #[tokio::test]
        async fn test_pinned_commit_is_its_own_head() {
            let transport = FlakyTransport {
                failing: vec!["primary"],
                attempts: Mutex::new(vec![]),
            };
            let mut opts = options(false);
            opts.git_ref = GitRef::Commit("cafe".to_string());
            assert_eq!(remote_head(&transport, &opts).await.unwrap(), "cafe");
            assert!(transport.attempts.lock().unwrap().is_empty());
        }
    }
}
