//! # Watch Loop
//!
//! Runs the kube-runtime controller over `Subscription` resources until a
//! shutdown signal arrives.
//!
//! A subscription that disappears surfaces as `ObjectNotFound`; its sync loop
//! is stopped and its hooks are forgotten.

use crate::controller::reconciler::{reconcile, Reconciler, ReconcilerError};
use crate::crd::{NamespacedName, Subscription};
use crate::runtime::error_policy::handle_reconciliation_error;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::controller::{Action, Error as ControllerError};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Run the controller watch loop
pub async fn run_watch_loop(
    subscriptions: Api<Subscription>,
    reconciler: Arc<Reconciler>,
) -> anyhow::Result<()> {
    let watch_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch",
        operation = "watch_loop"
    );

    info!("Starting controller watch loop...");
    let teardown_ctx = Arc::clone(&reconciler);

    Controller::new(subscriptions, watcher::Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
        .for_each(|result| {
            handle_result(&teardown_ctx, result);
            futures::future::ready(())
        })
        .instrument(watch_span)
        .await;

    reconciler.subscriber.stop_all();
    info!("Controller stopped gracefully");
    Ok(())
}

type ReconcileResult =
    Result<(ObjectRef<Subscription>, Action), ControllerError<ReconcilerError, watcher::Error>>;

fn handle_result(reconciler: &Reconciler, result: ReconcileResult) {
    match result {
        Ok((object, action)) => debug!("Reconciled {object}: {action:?}"),
        Err(ControllerError::ObjectNotFound(object)) => {
            let key = NamespacedName::new(object.namespace.unwrap_or_default(), object.name);
            debug!("Subscription {key} no longer exists");
            reconciler.teardown(&key);
        }
        Err(ControllerError::ReconcilerFailed(err, object)) => {
            debug!("Reconcile of {object} failed: {err}");
        }
        Err(err) => warn!("Controller stream error: {err:?}"),
    }
}
