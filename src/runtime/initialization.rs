//! # Initialization
//!
//! Controller start-up: rustls crypto provider, tracing subscriber,
//! Kubernetes client and the collaborators every reconcile shares.

use crate::config::ControllerConfig;
use crate::controller::git::{GitSubscriber, SyncContext};
use crate::controller::hooks::{HookContext, HookRegistry};
use crate::controller::reconciler::Reconciler;
use crate::crd::Subscription;
use crate::provider::cluster::{KubeApplyEngine, KubeJobClient, KubePlacement, KubeStore};
use crate::provider::git::GitCli;
use crate::provider::{ApplyEngine, GitTransport, HookJobClient, PlacementResolver, SubscriptionStore};
use anyhow::{Context, Result};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for Subscription resources across all namespaces
    pub subscriptions: Api<Subscription>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    pub config: Arc<ControllerConfig>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins over the configured level. `LOG_FORMAT=json` switches to
/// JSON lines.
pub fn init_tracing(config: &ControllerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_err| {
        EnvFilter::new(format!(
            "git_subscription_controller={}",
            config.log_level.to_ascii_lowercase()
        ))
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let config = Arc::new(ControllerConfig::from_env());
    init_tracing(&config)?;
    if !provider_installed {
        debug!("rustls crypto provider was already installed");
    }

    info!("Starting Git Subscription Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    debug!("Configuration: {config:?}");

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let store: Arc<dyn SubscriptionStore> = Arc::new(KubeStore::new(client.clone()));
    let apply: Arc<dyn ApplyEngine> = Arc::new(
        KubeApplyEngine::new(client.clone())
            .await
            .context("Failed to create apply engine")?,
    );
    let transport: Arc<dyn GitTransport> = Arc::new(GitCli::new(config.git_binary.clone()));
    let placement: Arc<dyn PlacementResolver> = Arc::new(KubePlacement::new(client.clone()));
    let jobs: Arc<dyn HookJobClient> = Arc::new(KubeJobClient::new(client.clone()));

    let subscriber = Arc::new(GitSubscriber::new(SyncContext {
        store: Arc::clone(&store),
        apply,
        transport: Arc::clone(&transport),
        config: Arc::clone(&config),
    }));
    let hooks = Arc::new(HookRegistry::new(HookContext {
        store: Arc::clone(&store),
        transport,
        placement,
        jobs,
        config: Arc::clone(&config),
    }));

    let reconciler = Arc::new(Reconciler::new(
        store,
        subscriber,
        hooks,
        Arc::clone(&config),
    ));
    let subscriptions: Api<Subscription> = Api::all(client.clone());

    Ok(InitializationResult {
        client,
        subscriptions,
        reconciler,
        config,
    })
}
