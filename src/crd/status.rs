//! # Subscription Status
//!
//! Status written back by the sync loop and the hook gate.

use serde::{Deserialize, Serialize};

/// Outcome of the latest reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Subscribed,
    Failed,
}

impl SubscriptionPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPhase::Subscribed => "Subscribed",
            SubscriptionPhase::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    /// Hook job history, present only when the subscription has hooks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansiblejobs: Option<AnsibleJobsStatus>,
}

/// Last applied hook jobs and bounded history per side, formatted `namespace/name`
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AnsibleJobsStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lastprehookjob: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prehookjobshistory: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lastposthookjob: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posthookjobshistory: Vec<String>,
}
