//! # Custom Resource Definitions
//!
//! Resource types the controller reads and writes. None of them are owned by
//! this controller: `Subscription` and `Channel` belong to the application
//! delivery hub and `AnsibleJob` to the automation operator, so their schemas
//! are not generated here.
//!
//! ## Module Structure
//!
//! - `reference.rs` - Object keys and references
//! - `subscription.rs` - Subscription spec, filters, overrides, placement, time window
//! - `status.rs` - Subscription status including hook history
//! - `channel.rs` - Git channel
//! - `hook_job.rs` - The external hook job resource

mod channel;
mod hook_job;
mod reference;
mod status;
mod subscription;

pub use channel::{Channel, ChannelSpec};
pub use hook_job::{AnsibleJob, AnsibleJobResult, AnsibleJobSpec, AnsibleJobStatus};
pub use reference::{NamespacedName, ObjectReference};
pub use status::{AnsibleJobsStatus, SubscriptionPhase, SubscriptionStatus};
pub use subscription::{
    AllowDenyItem, ClusterName, HourRange, LabelSelector, LabelSelectorRequirement, PackageFilter,
    PackageOverride, Placement, Subscription, SubscriptionSpec, TimeWindow,
};
