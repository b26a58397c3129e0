//! # Hook Job Client

use crate::constants::FIELD_MANAGER;
use crate::crd::{AnsibleJob, NamespacedName};
use crate::provider::HookJobClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::info;

#[derive(Clone)]
pub struct KubeJobClient {
    client: Client,
}

impl std::fmt::Debug for KubeJobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeJobClient").finish_non_exhaustive()
    }
}

impl KubeJobClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HookJobClient for KubeJobClient {
    async fn get_job(&self, key: &NamespacedName) -> Result<Option<AnsibleJob>> {
        let api: Api<AnsibleJob> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get_opt(&key.name)
            .await
            .with_context(|| format!("failed to get AnsibleJob {key}"))
    }

    async fn apply_job(&self, job: &AnsibleJob) -> Result<()> {
        let namespace = job.namespace().unwrap_or_default();
        let name = job.name_any();
        let api: Api<AnsibleJob> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(job),
        )
        .await
        .with_context(|| format!("failed to apply AnsibleJob {namespace}/{name}"))?;
        info!("Applied hook job {namespace}/{name}");
        Ok(())
    }
}
