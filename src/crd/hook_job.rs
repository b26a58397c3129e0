//! # Hook Job
//!
//! `AnsibleJob` runs an automation template outside the cluster. Only the
//! fields the hook gate rewrites or reads are typed; everything else passes
//! through unchanged.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[kube(
    kind = "AnsibleJob",
    group = "tower.ansible.com",
    version = "v1alpha1",
    namespaced,
    status = "AnsibleJobStatus",
    schema = "disabled"
)]
pub struct AnsibleJobSpec {
    /// Secret holding the automation platform host and token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tower_auth_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<serde_json::Value>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnsibleJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansible_job_result: Option<AnsibleJobResult>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct AnsibleJobResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl AnsibleJob {
    /// Status string reported by the automation operator, if any
    #[must_use]
    pub fn result_status(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.ansible_job_result.as_ref())
            .and_then(|result| result.status.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_round_trip() {
        let yaml = r##"
apiVersion: tower.ansible.com/v1alpha1
kind: AnsibleJob
metadata:
  name: notify
spec:
  job_template_name: notify-team
  inventory: Demo Inventory
  extra_vars:
    channel: "#deploys"
status:
  ansibleJobResult:
    status: successful
    elapsed: "12.4"
"##;
        let job: AnsibleJob = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(job.spec.job_template_name.as_deref(), Some("notify-team"));
        assert_eq!(job.spec.other["inventory"], "Demo Inventory");
        assert_eq!(job.result_status(), Some("successful"));

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["spec"]["inventory"], "Demo Inventory");
        assert_eq!(value["status"]["ansibleJobResult"]["elapsed"], "12.4");
    }
}
