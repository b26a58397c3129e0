//! Git Subscription Controller Library
//!
//! Continuously reconciles Git-backed application subscriptions onto the
//! cluster, gated by pre and post hook jobs.
//!
//! ## Quick Start
//!
//! ```rust
//! use git_subscription_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific
//! imports, use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod prelude;
pub mod provider;
pub mod runtime;
