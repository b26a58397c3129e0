//! # Controller
//!
//! Core controller modules for the Git Subscription Controller.
//!
//! - `backoff`: Fibonacci backoff for failed reconciles
//! - `git`: Per-subscription Git sync loop
//! - `hooks`: Pre/post hook registry and gate
//! - `reconciler`: Reconcile function tying hooks and the sync loop together

pub mod backoff;
pub mod git;
pub mod hooks;
pub mod reconciler;
