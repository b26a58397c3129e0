//! # Channel
//!
//! The Git source a subscription points at.

use crate::crd::{NamespacedName, ObjectReference};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, Default)]
#[kube(
    kind = "Channel",
    group = "apps.open-cluster-management.io",
    version = "v1",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSpec {
    /// Channel type; `Git` and `GitHub` are served by this controller
    #[serde(rename = "type")]
    pub channel_type: String,
    /// Repository URL
    pub pathname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<ObjectReference>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl Channel {
    /// True for `git` and `github` channels, compared case-insensitively
    #[must_use]
    pub fn is_git(&self) -> bool {
        let channel_type = self.spec.channel_type.as_str();
        channel_type.eq_ignore_ascii_case("git") || channel_type.eq_ignore_ascii_case("github")
    }

    #[must_use]
    pub fn namespace_str(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn key(&self) -> NamespacedName {
        NamespacedName::from_resource(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type_is_case_insensitive() {
        for channel_type in ["Git", "git", "GitHub", "GITHUB"] {
            let channel = Channel::new(
                "repo",
                ChannelSpec {
                    channel_type: channel_type.to_string(),
                    pathname: "https://example.com/repo.git".to_string(),
                    ..Default::default()
                },
            );
            assert!(channel.is_git(), "{channel_type} should be a git channel");
        }

        let channel = Channel::new(
            "helm",
            ChannelSpec {
                channel_type: "HelmRepo".to_string(),
                ..Default::default()
            },
        );
        assert!(!channel.is_git());
    }
}
