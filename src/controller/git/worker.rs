//! # Git Subscriber
//!
//! Owns one background sync loop per subscription.
//!
//! A loop runs the initial tick (retried per tier) and then ticks on the tier
//! period until stopped. The `off` tier runs the initial tick only. Stopping
//! is observed between ticks and during sleeps; a tick in flight completes.

use crate::controller::git::subscriber::{
    status_for, SubscriberItem, SyncContext, TickOutcome, TickTrigger,
};
use crate::controller::git::error::SyncError;
use crate::crd::{NamespacedName, Subscription};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type SharedItem = Arc<AsyncMutex<SubscriberItem>>;

#[derive(Debug)]
struct SubscriberHandle {
    generation: Option<i64>,
    item: SharedItem,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Registry of running sync loops
pub struct GitSubscriber {
    ctx: SyncContext,
    handles: Mutex<HashMap<NamespacedName, SubscriberHandle>>,
}

impl std::fmt::Debug for GitSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitSubscriber")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl GitSubscriber {
    #[must_use]
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<NamespacedName, SubscriberHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Start the loop of `subscription`
    ///
    /// Without `restart` a running loop is left alone and `false` is returned.
    /// With `restart` a running loop is stopped first and replaced.
    pub fn start(&self, subscription: &Subscription, restart: bool) -> bool {
        let key = subscription.key();
        let mut handles = self.handles();

        if let Some(existing) = handles.get(&key) {
            if !restart && !existing.task.is_finished() {
                debug!(subscription = %key, "Subscriber already running");
                return false;
            }
        }
        if let Some(previous) = handles.remove(&key) {
            info!(subscription = %key, "Restarting subscriber");
            signal_stop(&previous);
        }

        let item = SubscriberItem::new(subscription.clone(), &self.ctx.config);
        let item: SharedItem = Arc::new(AsyncMutex::new(item));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(self.ctx.clone(), Arc::clone(&item), stop_rx));

        info!(subscription = %key, "Started subscriber");
        handles.insert(
            key,
            SubscriberHandle {
                generation: subscription.metadata.generation,
                item,
                stop_tx,
                task,
            },
        );
        true
    }

    /// Stop the loop of `key`; unknown keys are a no-op
    pub fn stop(&self, key: &NamespacedName) -> bool {
        match self.handles().remove(key) {
            Some(handle) => {
                signal_stop(&handle);
                info!(subscription = %key, "Stopped subscriber");
                true
            }
            None => false,
        }
    }

    /// Stop every loop, used on shutdown
    pub fn stop_all(&self) {
        for (key, handle) in self.handles().drain() {
            debug!(subscription = %key, "Stopping subscriber");
            signal_stop(&handle);
        }
    }

    /// Whether a loop was started for `key`, finished or not
    #[must_use]
    pub fn is_tracking(&self, key: &NamespacedName) -> bool {
        self.handles().contains_key(key)
    }

    /// Generation the running loop was started for
    #[must_use]
    pub fn started_generation(&self, key: &NamespacedName) -> Option<i64> {
        self.handles().get(key).and_then(|handle| handle.generation)
    }

    fn item(&self, key: &NamespacedName) -> Option<SharedItem> {
        self.handles().get(key).map(|handle| Arc::clone(&handle.item))
    }

    /// Whether the latest tick of `key` succeeded; `None` for unknown keys
    ///
    /// Waits for a tick in flight to finish.
    pub async fn last_tick_successful(&self, key: &NamespacedName) -> Option<bool> {
        let item = self.item(key)?;
        let item = item.lock().await;
        Some(item.is_successful())
    }

    /// Commit applied by the latest successful tick
    pub async fn last_commit(&self, key: &NamespacedName) -> Option<String> {
        let item = self.item(key)?;
        let item = item.lock().await;
        item.last_commit().map(str::to_string)
    }

    /// Run one tick now, outside the schedule; `None` for unknown keys
    pub async fn sync_now(&self, key: &NamespacedName) -> Option<Result<TickOutcome, SyncError>> {
        let item = self.item(key)?;
        Some(run_tick(&self.ctx, &item, TickTrigger::Manual).await)
    }
}

fn signal_stop(handle: &SubscriberHandle) {
    if handle.stop_tx.send(true).is_err() {
        debug!("Subscriber loop already finished");
    }
}

/// Sleep for `duration`; true when stop was requested meanwhile
async fn sleep_or_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

async fn run_loop(ctx: SyncContext, item: SharedItem, mut stop: watch::Receiver<bool>) {
    let (key, schedule) = {
        let item = item.lock().await;
        (item.key().clone(), item.rate().schedule())
    };

    for attempt in 0..=schedule.retries {
        if *stop.borrow() {
            return;
        }
        let result = run_tick(&ctx, &item, TickTrigger::Initial).await;
        if result.is_ok() || attempt >= schedule.retries {
            break;
        }
        warn!(
            subscription = %key,
            "Initial sync attempt {} failed, retrying in {:?}",
            attempt + 1,
            schedule.retry_interval
        );
        if sleep_or_stop(&mut stop, schedule.retry_interval).await {
            return;
        }
    }

    let Some(period) = schedule.period else {
        debug!(subscription = %key, "Reconcile rate off, no periodic ticks");
        return;
    };
    loop {
        if sleep_or_stop(&mut stop, period).await {
            debug!(subscription = %key, "Subscriber loop exiting");
            return;
        }
        // Outcome is already logged and reported in status
        let _outcome = run_tick(&ctx, &item, TickTrigger::Periodic).await;
    }
}

/// Run one tick and write its status
async fn run_tick(
    ctx: &SyncContext,
    item: &SharedItem,
    trigger: TickTrigger,
) -> Result<TickOutcome, SyncError> {
    let mut item = item.lock().await;
    let result = item.do_subscription(ctx, trigger).await;
    match &result {
        Ok(TickOutcome::Applied { resources, commit }) => {
            info!(subscription = %item.key(), "Applied {resources} resources at {commit}");
        }
        Ok(TickOutcome::Skipped(reason)) => {
            debug!(subscription = %item.key(), "Tick skipped: {}", reason.as_str());
        }
        Err(err) if err.is_not_found() => {
            warn!(subscription = %item.key(), "Tick aborted: {err}");
        }
        Err(err) => {
            error!(subscription = %item.key(), "Tick failed: {err}");
        }
    }

    if let Some(status) = status_for(&result, ctx.config.status_message_max_len, Utc::now()) {
        if let Err(err) = ctx.store.update_subscription_status(item.key(), &status).await {
            error!(subscription = %item.key(), "Failed to update subscription status: {err:#}");
        }
    }
    result
}
