//! # Hook Status
//!
//! Writes the hook job history into the subscription status.
//!
//! Phase and message belong to the sync loop; only `ansiblejobs` is patched
//! here, and only when it changed, so unchanged passes do not trigger watch
//! events.

use crate::controller::reconciler::types::Reconciler;
use crate::crd::{Subscription, SubscriptionStatus};
use anyhow::{Context, Result};
use tracing::debug;

/// Patch `status.ansiblejobs` of `subscription` when the hook history changed
pub async fn write_hook_status(reconciler: &Reconciler, subscription: &Subscription) -> Result<()> {
    let current = subscription
        .status
        .as_ref()
        .and_then(|status| status.ansiblejobs.as_ref());
    let updated = reconciler
        .hooks
        .append_status_to_subscription(subscription)
        .await
        .ansiblejobs;

    if updated.is_none() || updated.as_ref() == current {
        debug!("Skipping hook status update - unchanged");
        return Ok(());
    }

    let patch = SubscriptionStatus {
        ansiblejobs: updated,
        ..SubscriptionStatus::default()
    };
    reconciler
        .store
        .update_subscription_status(&subscription.key(), &patch)
        .await
        .context("failed to write hook status")
}
