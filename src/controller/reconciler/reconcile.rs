//! # Reconcile
//!
//! One pass over a subscription:
//!
//! 1. Register hooks for the current generation
//! 2. Submit pre hooks and wait until they all succeed, requeueing meanwhile
//! 3. Start the sync loop, or restart it when the generation changed
//! 4. Submit post hooks once the loop reports a successful tick
//! 5. Write the hook history into the subscription status
//!
//! The gate is leveled: nothing is awaited in place, every pass re-checks the
//! hook jobs and requeues until they are done.

use crate::controller::hooks::HookType;
use crate::controller::reconciler::status::write_hook_status;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::Subscription;
use anyhow::Context;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Reconcile one subscription
pub async fn reconcile(
    subscription: Arc<Subscription>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let key = subscription.key();
    let span = info_span!(
        "reconcile",
        subscription = %key,
        generation = subscription.metadata.generation.unwrap_or_default()
    );

    reconcile_subscription(&subscription, &ctx)
        .instrument(span)
        .await
}

async fn reconcile_subscription(
    subscription: &Subscription,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    let key = subscription.key();
    let lock = ctx.subscription_lock(&key);
    let _guard = lock.lock().await;

    if subscription.metadata.deletion_timestamp.is_some() {
        ctx.teardown(&key);
        return Ok(Action::await_change());
    }

    let channel_key = subscription.channel_key();
    match ctx
        .store
        .get_channel(&channel_key)
        .await
        .with_context(|| format!("failed to read channel {channel_key}"))?
    {
        Some(channel) if channel.is_git() => {}
        Some(channel) => {
            debug!(
                "Channel {channel_key} is of type '{}', not handled here",
                channel.spec.channel_type
            );
            ctx.teardown(&key);
            return Ok(Action::await_change());
        }
        None => {
            warn!("Channel {channel_key} not found, waiting for it");
            return Ok(Action::requeue(ctx.config.resync_interval()));
        }
    }

    ctx.hooks.register_subscription(&key).await?;

    if !pre_hooks_completed(ctx, subscription).await? {
        // An outdated loop must not keep applying the previous revision
        if ctx.subscriber.is_tracking(&key)
            && ctx.subscriber.started_generation(&key) != subscription.metadata.generation
        {
            ctx.subscriber.stop(&key);
        }
        write_hook_status(ctx, subscription).await?;
        info!(
            "Pre hooks not completed, checking again in {:?}",
            ctx.config.hook_poll_interval()
        );
        return Ok(Action::requeue(ctx.config.hook_poll_interval()));
    }

    ensure_subscriber(ctx, subscription);

    let mut requeue = ctx.config.resync_interval();
    if ctx.hooks.has_hooks(&key, HookType::Post).await {
        if ctx.subscriber.last_tick_successful(&key).await == Some(true) {
            ctx.hooks.apply_hooks(&key, HookType::Post).await?;
        } else {
            debug!("Waiting for a successful sync before submitting post hooks");
            requeue = ctx.config.hook_poll_interval();
        }
    }

    write_hook_status(ctx, subscription).await?;
    ctx.reset_backoff(&key);
    Ok(Action::requeue(requeue))
}

/// Submit pre hooks and report whether they all succeeded
///
/// An empty pre hook slot is complete.
async fn pre_hooks_completed(
    ctx: &Reconciler,
    subscription: &Subscription,
) -> Result<bool, ReconcilerError> {
    let key = subscription.key();
    if !ctx.hooks.has_hooks(&key, HookType::Pre).await {
        return Ok(true);
    }
    ctx.hooks.apply_hooks(&key, HookType::Pre).await?;
    Ok(ctx.hooks.is_hooks_completed(&key, HookType::Pre).await?)
}

/// Start the sync loop, restarting it when it runs an older generation
fn ensure_subscriber(ctx: &Reconciler, subscription: &Subscription) {
    let key = subscription.key();
    if !ctx.subscriber.is_tracking(&key) {
        ctx.subscriber.start(subscription, false);
    } else if ctx.subscriber.started_generation(&key) != subscription.metadata.generation {
        info!(
            "Generation changed to {}, restarting sync loop",
            subscription.metadata.generation.unwrap_or_default()
        );
        ctx.subscriber.start(subscription, true);
    }
}
