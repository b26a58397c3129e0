//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::git::GitSubscriber;
use crate::controller::hooks::HookRegistry;
use crate::crd::NamespacedName;
use crate::provider::SubscriptionStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0:#}")]
    ReconciliationFailed(#[from] anyhow::Error),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Backoff state for a specific subscription
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min, max),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context of every reconcile
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn SubscriptionStore>,
    pub subscriber: Arc<GitSubscriber>,
    pub hooks: Arc<HookRegistry>,
    pub config: Arc<ControllerConfig>,
    // Backoff state per subscription (namespace/name), owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    // Serializes reconciles of one subscription
    pub subscription_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("subscriber", &self.subscriber)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        subscriber: Arc<GitSubscriber>,
        hooks: Arc<HookRegistry>,
        config: Arc<ControllerConfig>,
    ) -> Self {
        Self {
            store,
            subscriber,
            hooks,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            subscription_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fresh backoff state using the configured bounds
    #[must_use]
    pub fn new_backoff_state(&self) -> BackoffState {
        BackoffState::new(
            Duration::from_secs(self.config.backoff_min_secs),
            Duration::from_secs(self.config.backoff_max_secs),
        )
    }

    /// Get or create the reconcile lock of a subscription
    pub fn subscription_lock(&self, key: &NamespacedName) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .subscription_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Forget the error history of a subscription after a clean reconcile
    pub fn reset_backoff(&self, key: &NamespacedName) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(&key.to_string()) {
                if state.error_count > 0 {
                    debug!(subscription = %key, "Resetting backoff after {} errors", state.error_count);
                }
                state.reset();
            }
        }
    }

    /// Stop the sync loop and drop every record of a subscription that is gone
    pub fn teardown(&self, key: &NamespacedName) {
        let stopped = self.subscriber.stop(key);
        let deregistered = self.hooks.deregister_subscription(key);
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(&key.to_string());
        }
        if let Ok(mut locks) = self.subscription_locks.lock() {
            locks.remove(&key.to_string());
        }
        if stopped || deregistered {
            info!(subscription = %key, "Subscription removed, released its sync loop and hooks");
        }
    }
}
