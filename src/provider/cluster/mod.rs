//! # Cluster Collaborators
//!
//! Kubernetes-backed implementations of the provider traits.
//!
//! - `store.rs` - Subscriptions, channels, secrets and config maps
//! - `apply.rs` - Server-side apply of the desired resource set
//! - `placement.rs` - Target cluster resolution
//! - `jobs.rs` - Hook job access

mod apply;
mod jobs;
mod placement;
mod store;

pub use apply::{is_allowed, KubeApplyEngine};
pub use jobs::KubeJobClient;
pub use placement::KubePlacement;
pub use store::KubeStore;
