//! # Reconciler
//!
//! Drives one `Subscription` through the hook gate and keeps its sync loop
//! running.
//!
//! ## Module Structure
//!
//! - `types.rs` - Reconciler context, error type and backoff state
//! - `reconcile.rs` - The reconcile function
//! - `status.rs` - Hook history status writes

mod reconcile;
mod status;
mod types;

pub use reconcile::reconcile;
pub use status::write_hook_status;
pub use types::{BackoffState, Reconciler, ReconcilerError};
