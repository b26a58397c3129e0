//! # Runtime
//!
//! Process-level wiring of the controller.
//!
//! - `initialization.rs` - TLS provider, tracing, Kubernetes client and collaborators
//! - `watch_loop.rs` - The kube-runtime controller over `Subscription`
//! - `error_policy.rs` - Per-subscription Fibonacci backoff for failed reconciles

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
