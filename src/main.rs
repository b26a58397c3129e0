//! # Git Subscription Controller
//!
//! Watches `Subscription` resources across all namespaces. For every
//! subscription on a Git channel it:
//!
//! 1. **Runs pre hooks** - Submits `AnsibleJob` templates from the `prehook`
//!    directory and waits for them to succeed
//! 2. **Syncs the repository** - Clones the channel on the subscription's
//!    reconcile rate, classifies and transforms the manifests and applies them
//!    in dependency order
//! 3. **Runs post hooks** - Submits the `posthook` jobs after a successful sync
//!
//! Configuration is read from environment variables, see
//! [`git_subscription_controller::config::ControllerConfig`].

use anyhow::Result;
use git_subscription_controller::runtime::initialization::initialize;
use git_subscription_controller::runtime::watch_loop::run_watch_loop;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.subscriptions, Arc::clone(&init.reconciler)).await
}
