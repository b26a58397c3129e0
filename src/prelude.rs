//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use git_subscription_controller::prelude::*;
//! ```

// Resource types
pub use crate::crd::*;

// Collaborator traits
pub use crate::provider::{
    ApplyEngine, GitTransport, HookJobClient, PlacementResolver, ResourceUnit, SubscriptionStore,
};

// Sync loop and hook gate
pub use crate::controller::git::{
    GitSubscriber, ReconcileRate, SkipReason, SubscriberItem, SyncContext, SyncError, TickOutcome,
    TickTrigger,
};
pub use crate::controller::hooks::{AppliedInstance, HookContext, HookRegistry, HookType};

// Reconciler types
pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};

pub use crate::config::ControllerConfig;
