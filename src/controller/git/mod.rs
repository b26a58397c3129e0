//! # Git Subscription Sync
//!
//! Periodically materializes the manifests of a Git channel into the cluster.
//!
//! ## Module Structure
//!
//! - `connection.rs` - Channel credentials and TLS material
//! - `fetch.rs` - Ref selection, clone options and primary/secondary fetch
//! - `schedule.rs` - Reconcile-rate tiers and the drift detector
//! - `time_window.rs` - Deployment window evaluation
//! - `paths.rs` - Resource and hook path resolution inside a clone
//! - `classify.rs` - Repository walk and manifest buckets
//! - `selector.rs` - Label selector matching for package filters
//! - `overrides.rs` - Package overrides
//! - `transform.rs` - Per-manifest filtering and stamping
//! - `kustomize.rs` - Kustomize roots
//! - `helm.rs` - Chart index and `HelmRelease` synthesis
//! - `error.rs` - Tick error taxonomy
//! - `subscriber.rs` - Per-subscription state and one tick
//! - `worker.rs` - Background loops

pub mod classify;
pub mod connection;
pub mod error;
pub mod fetch;
pub mod helm;
pub mod kustomize;
pub mod overrides;
pub mod paths;
pub mod schedule;
pub mod selector;
pub mod subscriber;
pub mod time_window;
pub mod transform;
pub mod worker;

pub use connection::ConnectionConfig;
pub use error::SyncError;
pub use fetch::{ChannelConnection, CloneOptions, GitRef};
pub use schedule::ReconcileRate;
pub use subscriber::{SkipReason, SubscriberItem, SyncContext, TickOutcome, TickTrigger};
pub use worker::GitSubscriber;
