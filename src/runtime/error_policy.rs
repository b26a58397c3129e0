//! # Error Policy
//!
//! Requeue failed reconciles with a per-subscription Fibonacci backoff, so a
//! broken subscription does not delay the others.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Subscription;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback when the backoff registry cannot be locked
const DEFAULT_BACKOFF_SECS: u64 = 60;

/// Handle reconciliation errors with Fibonacci backoff
pub fn handle_reconciliation_error(
    subscription: Arc<Subscription>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let key = subscription.key();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        subscription = %key,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {key}: {error}");

    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(key.to_string())
                .or_insert_with(|| ctx.new_backoff_state());
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff states: {e}, using default backoff");
            (DEFAULT_BACKOFF_SECS, 0)
        }
    };

    let next_trigger_time =
        chrono::Duration::try_seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX))
            .and_then(|delay| chrono::Utc::now().checked_add_signed(delay));
    info!(
        "Retrying in {backoff_seconds}s at {} (error count: {error_count})",
        next_trigger_time.map_or_else(|| "unknown".to_string(), |time| time.to_rfc3339())
    );

    Action::requeue(Duration::from_secs(backoff_seconds))
}
